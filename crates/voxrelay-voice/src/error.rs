//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice cycle
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio conversion failed: {0}")]
    Conversion(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat endpoint failure. Absorbed by the response fallback chain, never sent to the caller.
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VoiceError::Timeout(err.to_string())
        } else {
            VoiceError::Endpoint(err.to_string())
        }
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}
