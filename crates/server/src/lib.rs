pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, OcrBackendKind, OcrConfig, ServerConfig};
pub use error::ApiError;
pub use routes::{build_router, AppState, SharedPipeline};
