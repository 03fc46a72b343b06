//! Error types for the live session client

use thiserror::Error;

/// Result type alias for live session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the live session client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access denied or no input device present
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Remote service rejected or timed out the connection open
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Connection dropped or errored after being established
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Session-fatal error classes surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Microphone could not be acquired
    Permission,
    /// Connection open was rejected or timed out
    Handshake,
    /// Established connection failed
    Transport,
}

impl Error {
    /// Classify an error that ends a session
    ///
    /// Decode errors are per-chunk and never end a session, so they have no
    /// fault class. Audio device failures during start count as permission
    /// failures: from the user's side the microphone was not granted.
    #[must_use]
    pub const fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Permission(_) | Self::Audio(_) => Some(FaultKind::Permission),
            Self::Handshake(_) | Self::Config(_) => Some(FaultKind::Handshake),
            Self::Transport(_) => Some(FaultKind::Transport),
            Self::Decode(_) | Self::Serialization(_) | Self::Io(_) | Self::Toml(_) => None,
        }
    }
}
