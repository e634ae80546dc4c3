//! OpenGL ES 2 shaped device seam. The renderer only talks to [`GraphicsDevice`]; the
//! `glow` backend drives a real context and [`RecordingDevice`] keeps everything in memory.

#[cfg(feature = "gl")]
mod glow_device;
mod recording;

#[cfg(feature = "gl")]
pub use glow_device::GlowDevice;
pub use recording::{DeviceCall, DrawRecord, RecordingDevice, UniformValue};

use glam::{Mat3, Mat4};
use std::fmt;
use std::num::NonZeroU32;

/// `GL_OUT_OF_MEMORY`.
pub const OUT_OF_MEMORY: u32 = 0x0505;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub NonZeroU32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// File extension used for shader text of this stage.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vsh",
            ShaderStage::Fragment => "fsh",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthFunc {
    Less,
    LessEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullFace {
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Raw error code drained from the device error queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlError(pub u32);

impl fmt::Display for GlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x0500 => f.write_str("GL_INVALID_ENUM"),
            0x0501 => f.write_str("GL_INVALID_VALUE"),
            0x0502 => f.write_str("GL_INVALID_OPERATION"),
            OUT_OF_MEMORY => f.write_str("GL_OUT_OF_MEMORY"),
            0x0506 => f.write_str("GL_INVALID_FRAMEBUFFER_OPERATION"),
            code => write!(f, "GL error 0x{code:04x}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: i32,
    pub offset: i32,
}

/// One `glDrawElements` call over 16 bit triangle indices.
#[derive(Clone, Copy, Debug)]
pub struct IndexedDraw<'a> {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub stride: i32,
    pub attributes: &'a [VertexAttribute],
    pub index_count: i32,
}

pub trait GraphicsDevice {
    fn create_buffer(&mut self) -> anyhow::Result<BufferHandle>;
    /// Static draw upload. Allocation failures surface through [`Self::take_errors`].
    fn upload_buffer(&mut self, target: BufferTarget, buffer: BufferHandle, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferHandle);
    /// Drains every pending device error.
    fn take_errors(&mut self) -> Vec<GlError>;

    fn create_shader(&mut self, stage: ShaderStage) -> anyhow::Result<ShaderHandle>;
    /// Compiles `source` into `shader`; the error carries the info log.
    fn compile_shader(&mut self, shader: ShaderHandle, source: &str) -> Result<(), String>;
    fn delete_shader(&mut self, shader: ShaderHandle);
    fn create_program(&mut self) -> anyhow::Result<ProgramHandle>;
    fn attach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);
    fn detach_shader(&mut self, program: ProgramHandle, shader: ShaderHandle);
    fn bind_attribute_location(&mut self, program: ProgramHandle, index: u32, name: &str);
    /// Links `program`; the error carries the info log.
    fn link_program(&mut self, program: ProgramHandle) -> Result<(), String>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn use_program(&mut self, program: Option<ProgramHandle>);

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4);
    fn set_uniform_mat3(&mut self, location: UniformLocation, value: &Mat3);
    fn set_uniform_vec4(&mut self, location: UniformLocation, value: [f32; 4]);
    fn set_uniform_f32(&mut self, location: UniformLocation, value: f32);
    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32);

    fn set_depth_func(&mut self, func: DepthFunc);
    fn set_depth_write(&mut self, enabled: bool);
    /// Source-alpha blending when enabled.
    fn set_blend(&mut self, enabled: bool);
    /// `None` disables face culling.
    fn set_cull_face(&mut self, face: Option<CullFace>);
    fn set_front_face(&mut self, winding: FrontFace);
    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&mut self, color: [f32; 4], depth: f32);
    fn draw_indexed(&mut self, draw: &IndexedDraw<'_>);
}
