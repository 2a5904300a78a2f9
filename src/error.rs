//! Error types for Hark

use thiserror::Error;

/// Result type alias for Hark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Hark
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Input device selection error
    #[error("device error: {0}")]
    Device(String),

    /// Wake word engine error
    #[error("detector error: {0}")]
    Detector(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Agent error
    #[error("agent error: {0}")]
    Agent(String),

    /// Email tool error
    #[error("email error: {0}")]
    Email(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
