// Core library for the drainflow ingestion pipeline

pub mod cli;
pub mod config;
pub mod config_file;
pub mod decompression;
pub mod drain;
pub mod error_handling;
pub mod model;
pub mod parallel;
pub mod platform;
pub mod readers;
pub mod stats;
pub mod store;
pub mod transform;

pub use cli::Cli;
pub use config::{DrainflowConfig, InputFormat};
pub use drain::{DrainConfig, DrainFactory};
pub use model::{Delta, Template, TemplateId, TemplateModel};
pub use parallel::{PipelineConfig, PipelineOutcome, PipelineProcessor};
pub use store::{JsonFileStore, MemoryStore, NullStore, TemplateStore};
