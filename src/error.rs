use std::path::PathBuf;
use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to open video source {locator}: {reason}")]
    Open { locator: String, reason: String },
    #[error("Failed to read frame {seq}: {reason}")]
    Read { seq: u64, reason: String },
    #[error("Region detection failed: {0}")]
    Detection(String),
    #[error("Failed to render frame: {0}")]
    Render(String),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("A job is already running or paused")]
    Conflict,
    #[error("Failed to clean up {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
