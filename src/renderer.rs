//! Per-frame orchestration over a [`GraphicsDevice`].

mod mesh_pass;
mod residency;
mod transparent_pass;

use log::{debug, info, trace, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::config::ViewerConfig;
use crate::frustum::FrustumClipper;
use crate::gpu::{DepthFunc, GraphicsDevice};
use crate::model::DisplayModel;
use crate::shader::{
    DirectoryShaders, Light, ShaderBuildError, ShaderLibrary, PER_PIXEL_LIGHTING, PER_VERTEX_LIGHTING,
};
use crate::viewport::Viewport;

use mesh_pass::DrawContext;
use transparent_pass::draw_transparent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderQuality {
    /// Per-vertex lighting.
    Fast,
    /// Per-pixel lighting.
    #[default]
    High,
}

impl RenderQuality {
    pub fn shader_name(self) -> &'static str {
        match self {
            RenderQuality::Fast => PER_VERTEX_LIGHTING,
            RenderQuality::High => PER_PIXEL_LIGHTING,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("model is not ready for rendering")]
    NotReady,
    #[error(transparent)]
    Shader(#[from] ShaderBuildError),
}

/// Counters for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: usize,
    /// Draws skipped because the partition is not GPU resident.
    pub skipped: usize,
    pub uploads: usize,
    pub rejected: usize,
    pub triangles: usize,
}

pub struct Renderer<D: GraphicsDevice> {
    device: D,
    shaders: ShaderLibrary,
    clipper: FrustumClipper,
    light: Light,
    clear_color: [f32; 4],
    frame_size: Option<(u32, u32)>,
}

impl<D: GraphicsDevice> Renderer<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, &ViewerConfig::default())
    }

    pub fn with_config(device: D, config: &ViewerConfig) -> Self {
        let shaders = match &config.shaders.directory {
            Some(directory) => {
                info!("[renderer] loading shaders from {}", directory.display());
                ShaderLibrary::new(Box::new(DirectoryShaders::new(directory.clone())))
            }
            None => ShaderLibrary::embedded(),
        };
        Self {
            device,
            shaders,
            clipper: FrustumClipper::new(),
            light: config.light.light(),
            clear_color: config.render.clear_color,
            frame_size: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn light(&self) -> &Light {
        &self.light
    }

    pub fn set_light(&mut self, light: Light) {
        self.light = light;
    }

    pub fn clipper(&self) -> &FrustumClipper {
        &self.clipper
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }

    /// Draws one frame. False when the model is not ready or the shader is unavailable.
    pub fn render_frame(&mut self, model: &mut DisplayModel, viewport: &mut Viewport, quality: RenderQuality) -> bool {
        match self.try_render_frame(model, viewport, quality) {
            Ok(stats) => {
                trace!(
                    "[renderer] {} draws, {} triangles, {} uploads, {} skipped",
                    stats.draw_calls,
                    stats.triangles,
                    stats.uploads,
                    stats.skipped
                );
                true
            }
            Err(err) => {
                debug!("[renderer] frame not drawn: {err}");
                false
            }
        }
    }

    pub fn try_render_frame(
        &mut self,
        model: &mut DisplayModel,
        viewport: &mut Viewport,
        quality: RenderQuality,
    ) -> Result<FrameStats, RenderError> {
        if !model.is_ready_for_rendering() {
            return Err(RenderError::NotReady);
        }
        self.clipper.compute(&model.visible_layers_bounds(), viewport);
        if let Some((width, height)) = self.frame_size {
            viewport.set_screen_size(width, height);
        }

        let shader = self.shaders.get_or_build(&mut self.device, quality.shader_name())?;
        shader.enable(&mut self.device);
        shader.setup_viewport(&mut self.device, viewport);
        shader.setup_light(&mut self.device, &self.light);
        let shader = &*shader;

        self.device.set_depth_func(DepthFunc::GreaterEqual);
        self.device.set_blend(false);

        let mut ctx = DrawContext::new(&mut self.device, shader, &mut model.meshes, &model.layers);
        for renderable in model.opaque.iter().filter(|renderable| !renderable.is_instance()) {
            ctx.draw(renderable);
        }
        for renderable in model.opaque.iter().filter(|renderable| renderable.is_instance()) {
            ctx.draw(renderable);
        }
        draw_transparent(&mut ctx, model.transparent.iter().filter(|renderable| !renderable.is_instance()));
        draw_transparent(&mut ctx, model.transparent.iter().filter(|renderable| renderable.is_instance()));
        let stats = ctx.finish();

        shader.disable(&mut self.device);
        Ok(stats)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        self.frame_size = Some((width, height));
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        self.device.set_viewport(0, 0, width, height);
        true
    }

    /// Clears to the configured color. Depth clears to 0 for the reversed depth test.
    pub fn clear(&mut self) -> bool {
        self.device.clear(self.clear_color, 0.0);
        true
    }

    /// Drops pending sources of meshes nothing visible draws. Resident buffers stay.
    pub fn handle_memory_warning(&mut self, model: &mut DisplayModel) -> usize {
        let discarded = model.discard_hidden_sources();
        warn!("[renderer] memory warning: dropped {discarded} pending hidden partitions");
        discarded
    }

    pub fn release_shaders(&mut self) {
        self.shaders.release(&mut self.device);
    }
}
