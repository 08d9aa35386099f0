//! Server error types.

use sockroute_protocol::{CodecError, ProtocolError, UnknownMethod};
use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration errors. Always raised before any call is served.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    UnknownMethod(#[from] UnknownMethod),

    #[error("failed to read '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),

    #[error("schema error: {0}")]
    Schema(#[from] CodecError),
}

/// Route resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no {method} handler for path {path}")]
    NotFound { method: String, path: String },
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}
