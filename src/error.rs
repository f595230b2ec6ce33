//! Error types for Sonoflow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonoflowError {
    #[error("Audio driver error: {0}")]
    AudioDriver(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Resampling error: {0}")]
    Resample(String),

    #[error("Buffering error: {0}")]
    Buffering(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SonoflowError>;
