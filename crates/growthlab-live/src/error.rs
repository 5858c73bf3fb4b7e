//! Error types for the live voice session

use thiserror::Error;

/// Result type alias for live session operations
pub type LiveResult<T> = Result<T, LiveError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Capture access refused or no usable input device. Never retried automatically.
    #[error("Microphone access denied: {0}")]
    MediaAccessDenied(String),

    /// Unexpected message shape or abrupt remote close.
    #[error("Session protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Invalid audio frame: {0}")]
    Frame(String),

    #[error("Session already closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<cpal::DevicesError> for LiveError {
    fn from(err: cpal::DevicesError) -> Self {
        LiveError::MediaAccessDenied(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for LiveError {
    fn from(err: cpal::BuildStreamError) -> Self {
        LiveError::MediaAccessDenied(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for LiveError {
    fn from(err: cpal::PlayStreamError) -> Self {
        LiveError::AudioDevice(err.to_string())
    }
}

impl From<base64::DecodeError> for LiveError {
    fn from(err: base64::DecodeError) -> Self {
        LiveError::Frame(err.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::Transport(err.to_string())
    }
}
