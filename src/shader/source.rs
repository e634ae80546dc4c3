use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::gpu::ShaderStage;

/// Supplies GLSL text for a base name such as `PerPixelLighting` and a stage.
pub trait ShaderSource {
    fn load(&self, base_name: &str, stage: ShaderStage) -> Result<String>;
}

/// The lighting shaders compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedShaders;

impl ShaderSource for EmbeddedShaders {
    fn load(&self, base_name: &str, stage: ShaderStage) -> Result<String> {
        let text = match (base_name.to_ascii_lowercase().as_str(), stage) {
            ("pervertexlighting", ShaderStage::Vertex) => {
                include_str!("../../assets/shaders/PerVertexLighting.vsh")
            }
            ("pervertexlighting", ShaderStage::Fragment) => {
                include_str!("../../assets/shaders/PerVertexLighting.fsh")
            }
            ("perpixellighting", ShaderStage::Vertex) => include_str!("../../assets/shaders/PerPixelLighting.vsh"),
            ("perpixellighting", ShaderStage::Fragment) => include_str!("../../assets/shaders/PerPixelLighting.fsh"),
            _ => bail!("no embedded {stage} shader named '{base_name}'"),
        };
        Ok(text.to_string())
    }
}

/// Reads `<directory>/<base_name>.<vsh|fsh>`.
#[derive(Debug, Clone)]
pub struct DirectoryShaders {
    directory: PathBuf,
}

impl DirectoryShaders {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl ShaderSource for DirectoryShaders {
    fn load(&self, base_name: &str, stage: ShaderStage) -> Result<String> {
        let path = self.directory.join(format!("{base_name}.{}", stage.extension()));
        fs::read_to_string(&path).with_context(|| format!("Failed to read shader {}", path.display()))
    }
}
