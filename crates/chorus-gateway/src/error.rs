//! Gateway error types

use crate::protocol::CloseCode;
use chorus_rest::RestError;
use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compressed stream was corrupt
    #[error("Compression error: {0}")]
    Compression(String),

    /// Socket-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation needs an open connection
    #[error("Connection closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fetching connection metadata failed
    #[error("REST error: {0}")]
    Rest(#[from] RestError),
}

impl GatewayError {
    /// Close code to send when this error forces the connection down
    pub fn to_close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Serialization(_) | Self::Compression(_) => Some(CloseCode::UnknownError),
            Self::Transport(_) | Self::Closed | Self::InvalidConfig(_) | Self::Rest(_) => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
