pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod exclusions;
pub mod notify;
pub mod preflight;
pub mod progress;
pub mod quarantine;
pub mod report;
pub mod scanner;
pub mod targets;
pub mod utils;

pub use crate::core::{ScanPipeline, ScanStatus};
pub use error::AppError;
