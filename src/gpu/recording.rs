use std::collections::HashMap;
use std::num::NonZeroU32;

use glam::{Mat3, Mat4};

use super::{
    BufferHandle, BufferTarget, CullFace, DepthFunc, FrontFace, GlError, GraphicsDevice, IndexedDraw,
    ProgramHandle, ShaderHandle, ShaderStage, UniformLocation, VertexAttribute, OUT_OF_MEMORY,
};

#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Mat3(Mat3),
    Vec4([f32; 4]),
    F32(f32),
    I32(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramHandle>,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub stride: i32,
    pub attributes: Vec<VertexAttribute>,
    pub index_count: i32,
    pub depth_write: bool,
    pub blend: bool,
    pub cull_face: Option<CullFace>,
    pub front_face: FrontFace,
}

/// Everything the device was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    CreateBuffer(BufferHandle),
    Upload { buffer: BufferHandle, target: BufferTarget, bytes: usize },
    DeleteBuffer(BufferHandle),
    UseProgram(Option<ProgramHandle>),
    Uniform { location: UniformLocation, value: UniformValue },
    DepthFunc(DepthFunc),
    DepthWrite(bool),
    Blend(bool),
    CullFace(Option<CullFace>),
    FrontFace(FrontFace),
    Viewport { x: i32, y: i32, width: i32, height: i32 },
    Clear { color: [f32; 4], depth: f32 },
    Draw(DrawRecord),
}

#[derive(Debug)]
struct ShaderRecord {
    source: String,
    compiled: bool,
}

#[derive(Debug, Default)]
struct ProgramRecord {
    shaders: Vec<ShaderHandle>,
    attributes: HashMap<String, u32>,
    uniforms: Vec<String>,
    linked: bool,
}

/// In-memory device. Buffer sizes count against an optional budget, shader uniforms are
/// resolved from `uniform <type> <name>;` declarations, and failures can be injected.
#[derive(Debug)]
pub struct RecordingDevice {
    next_id: u32,
    buffers: HashMap<BufferHandle, usize>,
    shaders: HashMap<ShaderHandle, ShaderRecord>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    pending_errors: Vec<GlError>,
    calls: Vec<DeviceCall>,
    uniforms: HashMap<(ProgramHandle, UniformLocation), UniformValue>,
    current_program: Option<ProgramHandle>,
    depth_write: bool,
    blend: bool,
    cull_face: Option<CullFace>,
    front_face: FrontFace,
    memory_budget: Option<usize>,
    fail_uploads: bool,
    fail_buffer_creation: bool,
    fail_compiles: bool,
    fail_links: bool,
    upload_attempts: usize,
    compile_count: usize,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self {
            next_id: 0,
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            pending_errors: Vec::new(),
            calls: Vec::new(),
            uniforms: HashMap::new(),
            current_program: None,
            depth_write: true,
            blend: false,
            cull_face: None,
            front_face: FrontFace::Ccw,
            memory_budget: None,
            fail_uploads: false,
            fail_buffer_creation: false,
            fail_compiles: false,
            fail_links: false,
            upload_attempts: 0,
            compile_count: 0,
        }
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload raises `GL_OUT_OF_MEMORY`.
    pub fn fail_all_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// `create_buffer` fails and leaves `GL_OUT_OF_MEMORY` queued.
    pub fn fail_buffer_creation(mut self) -> Self {
        self.fail_buffer_creation = true;
        self
    }

    /// Uploads that would push live buffer bytes past `bytes` raise `GL_OUT_OF_MEMORY`.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn fail_shader_compiles(mut self) -> Self {
        self.fail_compiles = true;
        self
    }

    pub fn fail_program_links(mut self) -> Self {
        self.fail_links = true;
        self
    }

    /// Queues an error as if some earlier call had raised it.
    pub fn inject_error(&mut self, code: u32) {
        self.pending_errors.push(GlError(code));
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.calls.iter().filter_map(|call| match call {
            DeviceCall::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_buffer_bytes(&self) -> usize {
        self.buffers.values().sum()
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn live_shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts
    }

    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.current_program
    }

    pub fn attribute_binding(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs.get(&program).and_then(|record| record.attributes.get(name).copied())
    }

    /// Last value written to the named uniform of `program`.
    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        let record = self.programs.get(&program)?;
        let index = record.uniforms.iter().position(|uniform| uniform == name)?;
        self.uniforms.get(&(program, UniformLocation(index as u32)))
    }

    fn allocate_id(&mut self) -> NonZeroU32 {
        self.next_id += 1;
        NonZeroU32::new(self.next_id).unwrap_or(NonZeroU32::MIN)
    }

    fn record_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if let Some(program) = self.current_program {
            self.uniforms.insert((program, location), value.clone());
        }
        self.calls.push(DeviceCall::Uniform { location, value });
    }
}

fn declared_uniforms(source: &str) -> impl Iterator<Item = String> + '_ {
    source.lines().filter_map(|line| {
        let mut words = line.split_whitespace();
        if words.next() != Some("uniform") {
            return None;
        }
        // optional precision qualifier before the type
        let mut rest: Vec<&str> = words.collect();
        if matches!(rest.first(), Some(&"lowp" | &"mediump" | &"highp")) {
            rest.remove(0);
        }
        let name = rest.get(1)?.trim_end_matches(';');
        let name = name.split('[').next().unwrap_or(name);
        (!name.is_empty()).then(|| name.to_string())
    })
}

impl GraphicsDevice for RecordingDevice {
    fn create_buffer(&mut self) -> anyhow::Result<BufferHandle> {
        if self.fail_buffer_creation {
            self.pending_errors.push(GlError(OUT_OF_MEMORY));
            anyhow::bail!("no buffer name available");
        }
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle, 0);
        self.calls.push(DeviceCall::CreateBuffer(handle));
        Ok(handle)
    }

    fn upload_buffer(&mut self, target: BufferTarget, buffer: BufferHandle, data: &[u8]) {
        self.upload_attempts += 1;
        self.calls.push(DeviceCall::Upload { buffer, target, bytes: data.len() });
        let Some(&current) = self.buffers.get(&buffer) else {
            self.pending_errors.push(GlError(0x0502));
            return;
        };
        let live_after = self.live_buffer_bytes() - current + data.len();
        let over_budget = self.memory_budget.is_some_and(|budget| live_after > budget);
        if self.fail_uploads || over_budget {
            self.pending_errors.push(GlError(OUT_OF_MEMORY));
            return;
        }
        self.buffers.insert(buffer, data.len());
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.calls.push(DeviceCall::DeleteBuffer(buffer));
    }

    fn take_errors(&mut self) -> Vec<GlError> {
        std::mem::take(&mut self.pending_errors)
    }

    fn create_shader(&mut self, _stage: ShaderStage) -> anyhow::Result<ShaderHandle> {
        let handle = ShaderHandle(self.allocate_id());
        self.shaders.insert(handle, ShaderRecord { source: String::new(), compiled: false });
        Ok(handle)
    }

    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> Result<(), String> {
        self.compile_count += 1;
        let fail = self.fail_compiles;
        let record = self.shaders.get_mut(&shader).ok_or_else(|| "unknown shader".to_string())?;
        record.source = source.to_string();
        if fail {
            return Err("0:1: error: compilation disabled for this device".to_string());
        }
        record.compiled = true;
        Ok(())
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self) -> anyhow::Result<ProgramHandle> {
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(handle, ProgramRecord::default());
        Ok(handle)
    }

    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.shaders.push(shader);
        }
    }

    fn detach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.shaders.retain(|&attached| attached != shader);
        }
    }

    fn bind_attribute_location(&mut self, program: ProgramHandle, index: u32, name: &str) {
        if let Some(record) = self.programs.get_mut(&program) {
            record.attributes.insert(name.to_string(), index);
        }
    }

    fn link_program(&mut self, program: ProgramHandle) -> Result<(), String> {
        if self.fail_links {
            return Err("link failed: linking disabled for this device".to_string());
        }
        let record = self.programs.get(&program).ok_or_else(|| "unknown program".to_string())?;
        let mut uniforms = Vec::new();
        for shader in &record.shaders {
            let source = self
                .shaders
                .get(shader)
                .filter(|s| s.compiled)
                .ok_or_else(|| "link failed: attached shader is not compiled".to_string())?;
            for name in declared_uniforms(&source.source) {
                if !uniforms.contains(&name) {
                    uniforms.push(name);
                }
            }
        }
        let record = self.programs.get_mut(&program).ok_or_else(|| "unknown program".to_string())?;
        record.uniforms = uniforms;
        record.linked = true;
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.uniforms.retain(|(owner, _), _| *owner != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let record = self.programs.get(&program).filter(|record| record.linked)?;
        record.uniforms.iter().position(|uniform| uniform == name).map(|index| UniformLocation(index as u32))
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.current_program = program;
        self.calls.push(DeviceCall::UseProgram(program));
    }

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        self.record_uniform(location, UniformValue::Mat4(*value));
    }

    fn set_uniform_mat3(&mut self, location: UniformLocation, value: &Mat3) {
        self.record_uniform(location, UniformValue::Mat3(*value));
    }

    fn set_uniform_vec4(&mut self, location: UniformLocation, value: [f32; 4]) {
        self.record_uniform(location, UniformValue::Vec4(value));
    }

    fn set_uniform_f32(&mut self, location: UniformLocation, value: f32) {
        self.record_uniform(location, UniformValue::F32(value));
    }

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32) {
        self.record_uniform(location, UniformValue::I32(value));
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        self.calls.push(DeviceCall::DepthFunc(func));
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
        self.calls.push(DeviceCall::DepthWrite(enabled));
    }

    fn set_blend(&mut self, enabled: bool) {
        self.blend = enabled;
        self.calls.push(DeviceCall::Blend(enabled));
    }

    fn set_cull_face(&mut self, face: Option<CullFace>) {
        self.cull_face = face;
        self.calls.push(DeviceCall::CullFace(face));
    }

    fn set_front_face(&mut self, winding: FrontFace) {
        self.front_face = winding;
        self.calls.push(DeviceCall::FrontFace(winding));
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.calls.push(DeviceCall::Viewport { x, y, width, height });
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        self.calls.push(DeviceCall::Clear { color, depth });
    }

    fn draw_indexed(&mut self, draw: &IndexedDraw<'_>) {
        self.calls.push(DeviceCall::Draw(DrawRecord {
            program: self.current_program,
            vertex_buffer: draw.vertex_buffer,
            index_buffer: draw.index_buffer,
            stride: draw.stride,
            attributes: draw.attributes.to_vec(),
            index_count: draw.index_count,
            depth_write: self.depth_write,
            blend: self.blend,
            cull_face: self.cull_face,
            front_face: self.front_face,
        }));
    }
}
