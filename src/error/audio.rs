// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio-related errors
///
/// These errors cover capture engine operations: stream creation, device
/// access, and lifecycle misuse. Per-frame conditions (ring overflow,
/// underrun) are not errors; they are counted and logged by the pipeline.
///
/// Error code range: 1001-1004
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Failed to open the capture stream
    StreamOpenFailed { reason: String },

    /// Hardware error occurred while starting or stopping a stream
    HardwareError { details: String },

    /// Pipeline is already running
    AlreadyRunning,

    /// Pipeline is not running
    NotRunning,
}

impl AudioError {
    pub const STREAM_OPEN_FAILED: i32 = 1001;
    pub const HARDWARE_ERROR: i32 = 1002;
    pub const ALREADY_RUNNING: i32 = 1003;
    pub const NOT_RUNNING: i32 = 1004;
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::StreamOpenFailed { .. } => AudioError::STREAM_OPEN_FAILED,
            AudioError::HardwareError { .. } => AudioError::HARDWARE_ERROR,
            AudioError::AlreadyRunning => AudioError::ALREADY_RUNNING,
            AudioError::NotRunning => AudioError::NOT_RUNNING,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::AlreadyRunning => {
                "Pipeline already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Pipeline not running. Call start() first.".to_string(),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}

/// Log an audio error with structured context
///
/// Logs the numeric code alongside the component so operational tooling can
/// match on it. Non-blocking; never panics.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::StreamOpenFailed {
                reason: "test".to_string()
            }
            .code(),
            AudioError::STREAM_OPEN_FAILED
        );
        assert_eq!(
            AudioError::HardwareError {
                details: "test".to_string()
            }
            .code(),
            AudioError::HARDWARE_ERROR
        );
        assert_eq!(AudioError::AlreadyRunning.code(), AudioError::ALREADY_RUNNING);
        assert_eq!(AudioError::NotRunning.code(), AudioError::NOT_RUNNING);
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::StreamOpenFailed {
            reason: "no default device".to_string(),
        };
        assert_eq!(
            err.message(),
            "Failed to open audio stream: no default device"
        );

        let err = AudioError::AlreadyRunning;
        assert!(err.message().contains("already running"));

        let err = AudioError::NotRunning;
        assert!(err.message().contains("not running"));
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NotRunning;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("test io error");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::HardwareError { details } => {
                assert!(details.contains("test io error"));
            }
            _ => panic!("Expected HardwareError"),
        }
    }
}
