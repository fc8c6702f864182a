#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, LinehaulError, PipelineError};

// 설정
pub use config::LinehaulConfig;

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};
