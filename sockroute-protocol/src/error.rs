//! Protocol and codec error types.

use thiserror::Error;

/// Errors raised by the schema registry and the message codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("value does not fit {type_name}: {reason}")]
    SchemaViolation { type_name: String, reason: String },

    #[error("malformed {type_name} buffer: {reason}")]
    Malformed { type_name: String, reason: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("type {0} is reserved and cannot be redefined")]
    ReservedType(String),

    #[error("duplicate message type: {0}")]
    DuplicateType(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub(crate) fn violation(type_name: &str, reason: impl Into<String>) -> Self {
        CodecError::SchemaViolation {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(type_name: &str, reason: impl Into<String>) -> Self {
        CodecError::Malformed {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns whether the error was caused by the shape of a value rather than
    /// the registry itself.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            CodecError::SchemaViolation { .. } | CodecError::Malformed { .. }
        )
    }
}

/// A method token outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown method '{0}' (allowed: get, post, put, delete)")]
pub struct UnknownMethod(pub String);

/// Framing-level errors on a stream transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'SKRT', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u16),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
