use std::path::PathBuf;
use thiserror::Error;

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_INFECTED: i32 = 1;
pub const EXIT_SCAN_ERROR: i32 = 2;
pub const EXIT_MISSING_DEPENDENCY: i32 = 10;
pub const EXIT_LOW_DISK_SPACE: i32 = 20;
pub const EXIT_PERMISSION: i32 = 30;
pub const EXIT_QUARANTINE: i32 = 40;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Fatal conditions that end a run. Each maps to a distinct process exit code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("required dependency not found: {0}")]
    MissingDependency(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scan error: {0}")]
    Scan(String),

    #[error("low disk space on {path:?}: {available_mb} MB free, {required_mb} MB required")]
    LowDiskSpace {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("permission error: {0}")]
    Permission(String),

    #[error("quarantine error: {0}")]
    Quarantine(String),

    #[error("scan interrupted")]
    Interrupted,
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::MissingDependency(_) => EXIT_MISSING_DEPENDENCY,
            AppError::Config(_) | AppError::Scan(_) => EXIT_SCAN_ERROR,
            AppError::LowDiskSpace { .. } => EXIT_LOW_DISK_SPACE,
            AppError::Permission(_) => EXIT_PERMISSION,
            AppError::Quarantine(_) => EXIT_QUARANTINE,
            AppError::Interrupted => EXIT_INTERRUPTED,
        }
    }

    pub fn config(err: anyhow::Error) -> Self {
        AppError::Config(format!("{:#}", err))
    }
}
