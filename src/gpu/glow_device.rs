use anyhow::anyhow;
use glam::{Mat3, Mat4};
use glow::HasContext;

use super::{
    BufferHandle, BufferTarget, CullFace, DepthFunc, FrontFace, GlError, GraphicsDevice, IndexedDraw,
    ProgramHandle, ShaderHandle, ShaderStage, UniformLocation,
};

const MAX_ATTRIBUTES: u32 = 4;

/// [`GraphicsDevice`] over a native `glow` context. The caller keeps the context current
/// on the calling thread.
pub struct GlowDevice {
    gl: glow::Context,
}

impl GlowDevice {
    pub fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }
}

fn gl_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Vertex => glow::ARRAY_BUFFER,
        BufferTarget::Index => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn buffer(handle: BufferHandle) -> glow::NativeBuffer {
    glow::NativeBuffer(handle.0)
}

fn shader(handle: ShaderHandle) -> glow::NativeShader {
    glow::NativeShader(handle.0)
}

fn program(handle: ProgramHandle) -> glow::NativeProgram {
    glow::NativeProgram(handle.0)
}

fn location(handle: UniformLocation) -> glow::NativeUniformLocation {
    glow::NativeUniformLocation(handle.0)
}

impl GraphicsDevice for GlowDevice {
    fn create_buffer(&mut self) -> anyhow::Result<BufferHandle> {
        let created = unsafe { self.gl.create_buffer() }.map_err(|err| anyhow!("glCreateBuffer: {err}"))?;
        Ok(BufferHandle(created.0))
    }

    fn upload_buffer(&mut self, target: BufferTarget, handle: BufferHandle, data: &[u8]) {
        let target = gl_target(target);
        unsafe {
            self.gl.bind_buffer(target, Some(buffer(handle)));
            self.gl.buffer_data_u8_slice(target, data, glow::STATIC_DRAW);
            self.gl.bind_buffer(target, None);
        }
    }

    fn delete_buffer(&mut self, handle: BufferHandle) {
        unsafe { self.gl.delete_buffer(buffer(handle)) }
    }

    fn take_errors(&mut self) -> Vec<GlError> {
        let mut errors = Vec::new();
        loop {
            let code = unsafe { self.gl.get_error() };
            if code == glow::NO_ERROR {
                break errors;
            }
            errors.push(GlError(code));
            // a lost context can report the same error forever
            if errors.len() >= 32 {
                break errors;
            }
        }
    }

    fn create_shader(&mut self, stage: ShaderStage) -> anyhow::Result<ShaderHandle> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let created =
            unsafe { self.gl.create_shader(kind) }.map_err(|err| anyhow!("glCreateShader({stage}): {err}"))?;
        Ok(ShaderHandle(created.0))
    }

    fn compile_shader(&mut self, handle: ShaderHandle, source: &str) -> Result<(), String> {
        unsafe {
            self.gl.shader_source(shader(handle), source);
            self.gl.compile_shader(shader(handle));
            if self.gl.get_shader_compile_status(shader(handle)) {
                Ok(())
            } else {
                Err(self.gl.get_shader_info_log(shader(handle)))
            }
        }
    }

    fn delete_shader(&mut self, handle: ShaderHandle) {
        unsafe { self.gl.delete_shader(shader(handle)) }
    }

    fn create_program(&mut self) -> anyhow::Result<ProgramHandle> {
        let created = unsafe { self.gl.create_program() }.map_err(|err| anyhow!("glCreateProgram: {err}"))?;
        Ok(ProgramHandle(created.0))
    }

    fn attach_shader(&mut self, handle: ProgramHandle, stage: ShaderHandle) {
        unsafe { self.gl.attach_shader(program(handle), shader(stage)) }
    }

    fn detach_shader(&mut self, handle: ProgramHandle, stage: ShaderHandle) {
        unsafe { self.gl.detach_shader(program(handle), shader(stage)) }
    }

    fn bind_attribute_location(&mut self, handle: ProgramHandle, index: u32, name: &str) {
        unsafe { self.gl.bind_attrib_location(program(handle), index, name) }
    }

    fn link_program(&mut self, handle: ProgramHandle) -> Result<(), String> {
        unsafe {
            self.gl.link_program(program(handle));
            if self.gl.get_program_link_status(program(handle)) {
                Ok(())
            } else {
                Err(self.gl.get_program_info_log(program(handle)))
            }
        }
    }

    fn delete_program(&mut self, handle: ProgramHandle) {
        unsafe { self.gl.delete_program(program(handle)) }
    }

    fn uniform_location(&mut self, handle: ProgramHandle, name: &str) -> Option<UniformLocation> {
        unsafe { self.gl.get_uniform_location(program(handle), name) }.map(|loc| UniformLocation(loc.0))
    }

    fn use_program(&mut self, handle: Option<ProgramHandle>) {
        unsafe { self.gl.use_program(handle.map(program)) }
    }

    fn set_uniform_mat4(&mut self, loc: UniformLocation, value: &Mat4) {
        unsafe { self.gl.uniform_matrix_4_f32_slice(Some(&location(loc)), false, &value.to_cols_array()) }
    }

    fn set_uniform_mat3(&mut self, loc: UniformLocation, value: &Mat3) {
        unsafe { self.gl.uniform_matrix_3_f32_slice(Some(&location(loc)), false, &value.to_cols_array()) }
    }

    fn set_uniform_vec4(&mut self, loc: UniformLocation, [x, y, z, w]: [f32; 4]) {
        unsafe { self.gl.uniform_4_f32(Some(&location(loc)), x, y, z, w) }
    }

    fn set_uniform_f32(&mut self, loc: UniformLocation, value: f32) {
        unsafe { self.gl.uniform_1_f32(Some(&location(loc)), value) }
    }

    fn set_uniform_i32(&mut self, loc: UniformLocation, value: i32) {
        unsafe { self.gl.uniform_1_i32(Some(&location(loc)), value) }
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        let func = match func {
            DepthFunc::Less => glow::LESS,
            DepthFunc::LessEqual => glow::LEQUAL,
            DepthFunc::GreaterEqual => glow::GEQUAL,
            DepthFunc::Always => glow::ALWAYS,
        };
        unsafe {
            self.gl.enable(glow::DEPTH_TEST);
            self.gl.depth_func(func);
        }
    }

    fn set_depth_write(&mut self, enabled: bool) {
        unsafe { self.gl.depth_mask(enabled) }
    }

    fn set_blend(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::BLEND);
                self.gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            } else {
                self.gl.disable(glow::BLEND);
            }
        }
    }

    fn set_cull_face(&mut self, face: Option<CullFace>) {
        unsafe {
            match face {
                Some(face) => {
                    self.gl.enable(glow::CULL_FACE);
                    self.gl.cull_face(match face {
                        CullFace::Front => glow::FRONT,
                        CullFace::Back => glow::BACK,
                    });
                }
                None => self.gl.disable(glow::CULL_FACE),
            }
        }
    }

    fn set_front_face(&mut self, winding: FrontFace) {
        let mode = match winding {
            FrontFace::Ccw => glow::CCW,
            FrontFace::Cw => glow::CW,
        };
        unsafe { self.gl.front_face(mode) }
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4], depth: f32) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear_depth_f32(depth);
            self.gl.depth_mask(true);
            self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn draw_indexed(&mut self, draw: &IndexedDraw<'_>) {
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer(draw.vertex_buffer)));
            self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer(draw.index_buffer)));
            for index in 0..MAX_ATTRIBUTES {
                match draw.attributes.iter().find(|attribute| attribute.location == index) {
                    Some(attribute) => {
                        self.gl.enable_vertex_attrib_array(index);
                        self.gl.vertex_attrib_pointer_f32(
                            index,
                            attribute.components,
                            glow::FLOAT,
                            false,
                            draw.stride,
                            attribute.offset,
                        );
                    }
                    None => self.gl.disable_vertex_attrib_array(index),
                }
            }
            self.gl.draw_elements(glow::TRIANGLES, draw.index_count, glow::UNSIGNED_SHORT, 0);
            for attribute in draw.attributes {
                self.gl.disable_vertex_attrib_array(attribute.location);
            }
            self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
    }
}
