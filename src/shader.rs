//! Lit GLSL ES programs: build, uniform table, per-frame and per-draw state.

mod source;

pub use source::{DirectoryShaders, EmbeddedShaders, ShaderSource};

use std::collections::HashMap;

use glam::{DMat4, DVec3};
use log::{debug, error};
use thiserror::Error;

use crate::gpu::{GraphicsDevice, ProgramHandle, ShaderHandle, ShaderStage, UniformLocation};
use crate::material::{Color, DisplayMaterial};
use crate::partition::AttributeSemantic;
use crate::viewport::Viewport;

pub const PER_VERTEX_LIGHTING: &str = "PerVertexLighting";
pub const PER_PIXEL_LIGHTING: &str = "PerPixelLighting";

/// Attribute names bound before linking, by location.
pub const ATTRIBUTE_BINDINGS: [(&str, u32); 4] =
    [("rglVertex", 0), ("rglNormal", 1), ("rglTexCoord0", 2), ("rglColor", 3)];

pub fn attribute_location(semantic: AttributeSemantic) -> u32 {
    match semantic {
        AttributeSemantic::Position => 0,
        AttributeSemantic::Normal => 1,
        AttributeSemantic::Color => 3,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShaderBuildError {
    #[error("shader '{name}' has an empty {stage} source")]
    EmptySource { name: String, stage: ShaderStage },
    #[error("shader '{name}' failed to compile its {stage} stage: {log}")]
    Compile { name: String, stage: ShaderStage, log: String },
    #[error("shader '{name}' could not create a GL object: {message}")]
    CreateProgram { name: String, message: String },
    #[error("shader '{name}' failed to link: {log}")]
    Link { name: String, log: String },
    #[error("shader '{name}' source unavailable: {message}")]
    Source { name: String, message: String },
}

/// Headlight style directional light; `direction` is in eye space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub direction: DVec3,
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: DVec3::Z,
            ambient: Color::BLACK,
            diffuse: Color::WHITE,
            specular: Color::rgb(90, 90, 90),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Uniforms {
    model_view: Option<UniformLocation>,
    projection: Option<UniformLocation>,
    normal: Option<UniformLocation>,
    model_view_projection: Option<UniformLocation>,
    diffuse: Option<UniformLocation>,
    specular: Option<UniformLocation>,
    emission: Option<UniformLocation>,
    shininess: Option<UniformLocation>,
    uses_colors: Option<UniformLocation>,
    light_ambient: Option<UniformLocation>,
    light_diffuse: Option<UniformLocation>,
    light_specular: Option<UniformLocation>,
    light_position: Option<UniformLocation>,
}

impl Uniforms {
    fn resolve(device: &mut dyn GraphicsDevice, program: ProgramHandle) -> Self {
        let mut find = |name: &str| device.uniform_location(program, name);
        Self {
            model_view: find("rglModelViewMatrix"),
            projection: find("rglProjectionMatrix"),
            normal: find("rglNormalMatrix"),
            model_view_projection: find("rglModelViewProjectionMatrix"),
            diffuse: find("rglDiffuse"),
            specular: find("rglSpecular"),
            emission: find("rglEmission"),
            shininess: find("rglShininess"),
            uses_colors: find("rglUsesColors"),
            light_ambient: find("rglLightAmbient"),
            light_diffuse: find("rglLightDiffuse"),
            light_specular: find("rglLightSpecular"),
            light_position: find("rglLightPosition"),
        }
    }
}

#[derive(Debug)]
pub struct ShaderProgram {
    name: String,
    program: ProgramHandle,
    uniforms: Uniforms,
    base_model_view: DMat4,
    projection: DMat4,
}

impl ShaderProgram {
    pub fn build(
        device: &mut dyn GraphicsDevice,
        name: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderBuildError> {
        for (stage, text) in [(ShaderStage::Vertex, vertex_source), (ShaderStage::Fragment, fragment_source)] {
            if text.trim().is_empty() {
                return Err(ShaderBuildError::EmptySource { name: name.to_string(), stage });
            }
        }

        let vertex = compile_stage(device, name, ShaderStage::Vertex, vertex_source)?;
        let fragment = match compile_stage(device, name, ShaderStage::Fragment, fragment_source) {
            Ok(fragment) => fragment,
            Err(err) => {
                device.delete_shader(vertex);
                return Err(err);
            }
        };

        let program = match device.create_program() {
            Ok(program) => program,
            Err(err) => {
                device.delete_shader(vertex);
                device.delete_shader(fragment);
                return Err(ShaderBuildError::CreateProgram { name: name.to_string(), message: format!("{err:#}") });
            }
        };
        device.attach_shader(program, vertex);
        device.attach_shader(program, fragment);
        for (attribute, index) in ATTRIBUTE_BINDINGS {
            device.bind_attribute_location(program, index, attribute);
        }
        let linked = device.link_program(program);
        device.detach_shader(program, vertex);
        device.detach_shader(program, fragment);
        device.delete_shader(vertex);
        device.delete_shader(fragment);
        if let Err(log) = linked {
            device.delete_program(program);
            return Err(ShaderBuildError::Link { name: name.to_string(), log });
        }

        let uniforms = Uniforms::resolve(device, program);
        debug!("[shader] built '{name}'");
        Ok(Self {
            name: name.to_string(),
            program,
            uniforms,
            base_model_view: DMat4::IDENTITY,
            projection: DMat4::IDENTITY,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn enable(&self, device: &mut dyn GraphicsDevice) {
        device.use_program(Some(self.program));
    }

    pub fn disable(&self, device: &mut dyn GraphicsDevice) {
        device.use_program(None);
    }

    /// Uploads view and projection for the frame and remembers them as the base transform.
    pub fn setup_viewport(&mut self, device: &mut dyn GraphicsDevice, viewport: &Viewport) {
        self.base_model_view = viewport.view_matrix();
        self.projection = viewport.projection_matrix();
        if let Some(location) = self.uniforms.projection {
            device.set_uniform_mat4(location, &self.projection.as_mat4());
        }
        self.upload_model_view(device, &self.base_model_view);
    }

    pub fn setup_light(&self, device: &mut dyn GraphicsDevice, light: &Light) {
        let uniforms = self.uniforms;
        set_color(device, uniforms.light_ambient, light.ambient.to_f32());
        set_color(device, uniforms.light_diffuse, light.diffuse.to_f32());
        set_color(device, uniforms.light_specular, light.specular.to_f32());
        if let Some(location) = uniforms.light_position {
            let d = light.direction.as_vec3();
            device.set_uniform_vec4(location, [d.x, d.y, d.z, 0.0]);
        }
    }

    /// Applies surface colors. Blending follows the material alpha.
    pub fn setup_material(&self, device: &mut dyn GraphicsDevice, material: &DisplayMaterial) {
        let material = &material.material;
        let alpha = material.alpha();
        let shininess = material.shininess();
        let uniforms = self.uniforms;

        set_color(device, uniforms.diffuse, material.diffuse.with_alpha_f32(alpha));
        let specular = if material.shine == 0 { Color::BLACK } else { material.specular };
        set_color(device, uniforms.specular, specular.to_f32());
        let ambient = if material.ambient.a > 0 { material.ambient } else { Color::BLACK };
        set_color(device, uniforms.light_ambient, ambient.to_f32());
        set_color(device, uniforms.emission, material.emission.with_alpha_f32(1.0));
        if let Some(location) = uniforms.shininess {
            device.set_uniform_f32(location, shininess);
        }
        if let Some(location) = uniforms.uses_colors {
            device.set_uniform_i32(location, 0);
        }
        device.set_blend(alpha < 1.0);
    }

    pub fn enable_color_usage(&self, device: &mut dyn GraphicsDevice, enabled: bool) {
        if let Some(location) = self.uniforms.uses_colors {
            device.set_uniform_i32(location, i32::from(enabled));
        }
    }

    /// Draws that follow use `base * transform` until [`Self::pop_instance_transform`].
    pub fn push_instance_transform(&self, device: &mut dyn GraphicsDevice, transform: &DMat4) {
        self.upload_model_view(device, &(self.base_model_view * *transform));
    }

    pub fn pop_instance_transform(&self, device: &mut dyn GraphicsDevice) {
        self.upload_model_view(device, &self.base_model_view);
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.delete_program(self.program);
    }

    fn upload_model_view(&self, device: &mut dyn GraphicsDevice, model_view: &DMat4) {
        let uniforms = self.uniforms;
        if let Some(location) = uniforms.model_view {
            device.set_uniform_mat4(location, &model_view.as_mat4());
        }
        if let Some(location) = uniforms.model_view_projection {
            device.set_uniform_mat4(location, &(self.projection * *model_view).as_mat4());
        }
        if let Some(location) = uniforms.normal {
            device.set_uniform_mat3(location, &Viewport::normal_matrix(model_view).as_mat3());
        }
    }
}

fn compile_stage(
    device: &mut dyn GraphicsDevice,
    name: &str,
    stage: ShaderStage,
    text: &str,
) -> Result<ShaderHandle, ShaderBuildError> {
    let shader = device
        .create_shader(stage)
        .map_err(|err| ShaderBuildError::CreateProgram { name: name.to_string(), message: format!("{err:#}") })?;
    if let Err(log) = device.compile_shader(shader, text) {
        device.delete_shader(shader);
        return Err(ShaderBuildError::Compile { name: name.to_string(), stage, log });
    }
    Ok(shader)
}

fn set_color(device: &mut dyn GraphicsDevice, location: Option<UniformLocation>, color: [f32; 4]) {
    if let Some(location) = location {
        device.set_uniform_vec4(location, color);
    }
}

/// Programs by case-insensitive name. Failed builds are cached too, so a broken variant is
/// reported once instead of being recompiled every frame.
pub struct ShaderLibrary {
    source: Box<dyn ShaderSource>,
    programs: HashMap<String, Result<ShaderProgram, ShaderBuildError>>,
}

impl ShaderLibrary {
    pub fn new(source: Box<dyn ShaderSource>) -> Self {
        Self { source, programs: HashMap::new() }
    }

    pub fn embedded() -> Self {
        Self::new(Box::new(EmbeddedShaders))
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get_or_build(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
    ) -> Result<&mut ShaderProgram, ShaderBuildError> {
        let key = name.to_ascii_lowercase();
        if !self.programs.contains_key(&key) {
            let built = self.build(device, name);
            if let Err(err) = &built {
                error!("[shader] {err}");
            }
            self.programs.insert(key.clone(), built);
        }
        match self.programs.get_mut(&key) {
            Some(Ok(program)) => Ok(program),
            Some(Err(err)) => Err(err.clone()),
            None => Err(ShaderBuildError::Source { name: name.to_string(), message: "not cached".to_string() }),
        }
    }

    /// Deletes every cached program.
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, built) in self.programs.drain() {
            if let Ok(program) = built {
                program.destroy(device);
            }
        }
    }

    fn build(&self, device: &mut dyn GraphicsDevice, name: &str) -> Result<ShaderProgram, ShaderBuildError> {
        let load = |stage| {
            self.source
                .load(name, stage)
                .map_err(|err| ShaderBuildError::Source { name: name.to_string(), message: format!("{err:#}") })
        };
        let vertex = load(ShaderStage::Vertex)?;
        let fragment = load(ShaderStage::Fragment)?;
        ShaderProgram::build(device, name, &vertex, &fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{RecordingDevice, UniformValue};
    use crate::material::{Material, MaterialKey};

    const VERTEX: &str = "uniform mat4 rglModelViewMatrix;\nuniform mat4 rglModelViewProjectionMatrix;\nvoid main() {}";
    const FRAGMENT: &str =
        "uniform lowp vec4 rglDiffuse;\nuniform lowp vec4 rglSpecular;\nuniform float rglShininess;\nvoid main() {}";

    #[test]
    fn build_binds_attributes_and_frees_stage_objects() {
        let mut device = RecordingDevice::new();
        let program = ShaderProgram::build(&mut device, "test", VERTEX, FRAGMENT).expect("build");
        assert_eq!(device.attribute_binding(program.program(), "rglColor"), Some(3));
        assert_eq!(device.attribute_binding(program.program(), "rglVertex"), Some(0));
        assert_eq!(device.live_shader_count(), 0);
        assert!(program.uniforms.diffuse.is_some());
        assert!(program.uniforms.light_position.is_none());
    }

    #[test]
    fn empty_source_is_rejected_before_compiling() {
        let mut device = RecordingDevice::new();
        let err = ShaderProgram::build(&mut device, "blank", "  \n", FRAGMENT).unwrap_err();
        assert!(matches!(err, ShaderBuildError::EmptySource { stage: ShaderStage::Vertex, .. }));
        assert_eq!(device.compile_count(), 0);
    }

    #[test]
    fn failures_release_every_object() {
        let mut device = RecordingDevice::new().fail_shader_compiles();
        let err = ShaderProgram::build(&mut device, "broken", VERTEX, FRAGMENT).unwrap_err();
        assert!(matches!(err, ShaderBuildError::Compile { stage: ShaderStage::Vertex, .. }));
        assert_eq!(device.live_shader_count(), 0);

        let mut device = RecordingDevice::new().fail_program_links();
        let err = ShaderProgram::build(&mut device, "unlinked", VERTEX, FRAGMENT).unwrap_err();
        assert!(matches!(err, ShaderBuildError::Link { .. }));
        assert_eq!(device.live_shader_count(), 0);
        assert_eq!(device.live_program_count(), 0);
    }

    #[test]
    fn material_setup_rescales_shine_and_blacks_out_specular() {
        let mut device = RecordingDevice::new();
        let program = ShaderProgram::build(&mut device, "test", VERTEX, FRAGMENT).expect("build");
        program.enable(&mut device);

        let dull = DisplayMaterial {
            key: MaterialKey::Index(0),
            material: Material { specular: Color::WHITE, shine: 0, transparency: 0.5, ..Material::default() },
        };
        program.setup_material(&mut device, &dull);
        assert_eq!(device.uniform(program.program(), "rglSpecular"), Some(&UniformValue::Vec4([0.0, 0.0, 0.0, 1.0])));
        assert_eq!(device.uniform(program.program(), "rglDiffuse"), Some(&UniformValue::Vec4([1.0, 1.0, 1.0, 0.5])));

        let shiny = DisplayMaterial {
            key: MaterialKey::Index(1),
            material: Material { specular: Color::WHITE, shine: 255, ..Material::default() },
        };
        program.setup_material(&mut device, &shiny);
        assert_eq!(device.uniform(program.program(), "rglShininess"), Some(&UniformValue::F32(128.0)));
        assert_eq!(device.uniform(program.program(), "rglSpecular"), Some(&UniformValue::Vec4([1.0; 4])));

        let tinted = DisplayMaterial {
            key: MaterialKey::Index(2),
            material: Material {
                specular: Color::rgba(255, 0, 0, 51),
                shine: 10,
                transparency: 0.5,
                ..Material::default()
            },
        };
        program.setup_material(&mut device, &tinted);
        // specular keeps its own alpha; only diffuse carries the transparency
        assert_eq!(device.uniform(program.program(), "rglSpecular"), Some(&UniformValue::Vec4([1.0, 0.0, 0.0, 0.2])));
    }

    #[test]
    fn failed_builds_are_cached() {
        let mut device = RecordingDevice::new().fail_shader_compiles();
        let mut library = ShaderLibrary::embedded();
        assert!(library.get_or_build(&mut device, PER_PIXEL_LIGHTING).is_err());
        let attempts = device.compile_count();
        assert!(library.get_or_build(&mut device, "perpixellighting").is_err());
        assert_eq!(device.compile_count(), attempts);
        assert_eq!(library.len(), 1);
    }
}
