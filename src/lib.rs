pub mod config;
pub mod diagnostics;
pub mod diff;
pub mod fanout;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod plugins;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::FetchOrchestrator;
pub use pipeline::StatusPipeline;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
