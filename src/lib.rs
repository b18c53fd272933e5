#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod result_log;
pub mod scenario;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::Orchestrator;
