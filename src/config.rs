use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::material::Color;
use crate::model::PreparationOptions;
use crate::partition::PartitionLimits;
use crate::renderer::RenderQuality;
use crate::shader::Light;

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    #[serde(default = "PartitionConfig::default_max_vertices")]
    pub max_vertices: usize,
    #[serde(default = "PartitionConfig::default_max_faces")]
    pub max_faces: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub quality: RenderQuality,
    #[serde(default = "RenderConfig::default_clear_color")]
    pub clear_color: [f32; 4],
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    /// Eye space; handed to the shaders as `rglLightPosition`.
    #[serde(default = "LightConfig::default_direction")]
    pub direction: [f64; 3],
    #[serde(default = "LightConfig::default_ambient")]
    pub ambient: [u8; 3],
    #[serde(default = "LightConfig::default_diffuse")]
    pub diffuse: [u8; 3],
    #[serde(default = "LightConfig::default_specular")]
    pub specular: [u8; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreparationConfig {
    #[serde(default = "PreparationConfig::default_compute_missing_normals")]
    pub compute_missing_normals: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShaderConfig {
    /// Directory holding `<name>.vsh` / `<name>.fsh`; embedded sources when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ViewerConfig {
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub light: LightConfig,
    #[serde(default)]
    pub preparation: PreparationConfig,
    #[serde(default)]
    pub shaders: ShaderConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ViewerConfigOverrides {
    pub quality: Option<RenderQuality>,
    pub max_vertices: Option<usize>,
}

impl PartitionConfig {
    const fn default_max_vertices() -> usize {
        65_532
    }

    const fn default_max_faces() -> usize {
        i32::MAX as usize - 3
    }

    pub fn limits(&self) -> PartitionLimits {
        PartitionLimits::new(self.max_vertices, self.max_faces)
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { max_vertices: Self::default_max_vertices(), max_faces: Self::default_max_faces() }
    }
}

impl RenderConfig {
    const fn default_clear_color() -> [f32; 4] {
        [1.0, 1.0, 1.0, 0.0]
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { quality: RenderQuality::default(), clear_color: Self::default_clear_color() }
    }
}

impl LightConfig {
    const fn default_direction() -> [f64; 3] {
        [0.0, 0.0, 1.0]
    }

    const fn default_ambient() -> [u8; 3] {
        [0, 0, 0]
    }

    const fn default_diffuse() -> [u8; 3] {
        [255, 255, 255]
    }

    const fn default_specular() -> [u8; 3] {
        [90, 90, 90]
    }

    pub fn light(&self) -> Light {
        Light {
            direction: self.direction.into(),
            ambient: Color::from(self.ambient),
            diffuse: Color::from(self.diffuse),
            specular: Color::from(self.specular),
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: Self::default_direction(),
            ambient: Self::default_ambient(),
            diffuse: Self::default_diffuse(),
            specular: Self::default_specular(),
        }
    }
}

impl PreparationConfig {
    const fn default_compute_missing_normals() -> bool {
        true
    }
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self { compute_missing_normals: Self::default_compute_missing_normals() }
    }
}

impl ViewerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ViewerConfigOverrides) {
        if let Some(quality) = overrides.quality {
            self.render.quality = quality;
        }
        if let Some(max_vertices) = overrides.max_vertices {
            self.partition.max_vertices = max_vertices;
        }
    }

    pub fn preparation_options(&self) -> PreparationOptions {
        PreparationOptions {
            limits: self.partition.limits(),
            compute_missing_normals: self.preparation.compute_missing_normals,
        }
    }
}

impl ViewerConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.quality.is_none() && self.max_vertices.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.quality.is_some() {
            fields.push("quality");
        }
        if self.max_vertices.is_some() {
            fields.push("max_vertices");
        }
        fields
    }
}
