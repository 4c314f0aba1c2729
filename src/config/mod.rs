//! Runtime configuration: `config/pipeline.toml` for the decision pipeline,
//! `config/vision.json` for the external vision service.

pub mod pipeline;
pub mod vision;

pub use pipeline::PipelineConfig;
pub use vision::VisionConfig;
