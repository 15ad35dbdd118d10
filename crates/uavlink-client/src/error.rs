//! Client errors.

use uavlink_core::{DefinitionError, Dialect, HandshakeError};

use crate::config::ConfigError;

/// Errors returned by client operations.
///
/// Every variant is scoped to the call or connection that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unknown definition: {0}")]
    UnknownDefinition(String),
    #[error(transparent)]
    Definition(DefinitionError),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("telemetry protocol error: {0}")]
    Protocol(#[from] HandshakeError),
    #[error("{operation} is not supported by the {dialect} dialect")]
    Unsupported {
        operation: &'static str,
        dialect: Dialect,
    },
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<DefinitionError> for ClientError {
    fn from(err: DefinitionError) -> Self {
        match err {
            DefinitionError::UnknownDefinition(name) => Self::UnknownDefinition(name),
            other => Self::Definition(other),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
