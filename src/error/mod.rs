// Error types for the beatlight pipeline
//
// This module defines custom error types for audio and configuration
// failures, providing structured error handling with numeric codes for
// operational log scraping.

mod audio;
mod config;

pub use audio::{log_audio_error, AudioError};
pub use config::ConfigError;

use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the process boundary (logs, exit paths, external monitors).
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Start-up failure: either the configuration was rejected or the audio
/// capture side could not be brought up. Per-frame failures never surface
/// here; they are recovered locally inside the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum StartError {
    Config(ConfigError),
    Audio(AudioError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Config(e) => write!(f, "configuration rejected: {}", e),
            StartError::Audio(e) => write!(f, "audio start failed: {}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<ConfigError> for StartError {
    fn from(err: ConfigError) -> Self {
        StartError::Config(err)
    }
}

impl From<AudioError> for StartError {
    fn from(err: AudioError) -> Self {
        StartError::Audio(err)
    }
}
