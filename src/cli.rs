use crate::config::ViewerConfigOverrides;
use crate::renderer::RenderQuality;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    quality: Option<RenderQuality>,
    max_vertices: Option<usize>,
    frames: Option<u32>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Use --config/--quality/--max-vertices/--frames with values.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "quality" => overrides.quality = Some(parse_quality(&value)?),
                "max-vertices" => {
                    overrides.max_vertices =
                        Some(value.parse::<usize>().with_context(|| format!("Invalid max-vertices '{value}'"))?);
                }
                "frames" => {
                    overrides.frames = Some(value.parse::<u32>().with_context(|| format!("Invalid frames '{value}'"))?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --config, --quality, --max-vertices, --frames."),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn frames(&self) -> Option<u32> {
        self.frames
    }

    pub fn to_config_overrides(&self) -> ViewerConfigOverrides {
        ViewerConfigOverrides { quality: self.quality, max_vertices: self.max_vertices }
    }
}

fn parse_quality(value: &str) -> Result<RenderQuality> {
    match value.to_ascii_lowercase().as_str() {
        "fast" | "vertex" => Ok(RenderQuality::Fast),
        "high" | "pixel" => Ok(RenderQuality::High),
        other => bail!("Invalid quality value '{other}'. Use fast or high."),
    }
}
