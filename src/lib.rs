pub mod cli;
pub mod config;
pub mod display;
pub mod events;
pub mod frustum;
pub mod gpu;
pub mod material;
pub mod mesh;
pub mod model;
pub mod partition;
pub mod renderer;
pub mod shader;
pub mod viewport;

pub use config::{ViewerConfig, ViewerConfigOverrides};
pub use model::{prepare_model, DisplayModel, ModelSource, PreparationError, PreparationTask};
pub use partition::{partition_mesh, PartitionLimits, PartitionedMesh};
pub use renderer::{FrameStats, RenderQuality, Renderer};
