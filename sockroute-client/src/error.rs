//! Client error types.

use sockroute_protocol::{ApiError, CodecError, Message, ProtocolError};
use thiserror::Error;

/// Faults of the transport itself, as opposed to anything the peer answered.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,
}

impl TransportError {
    /// Returns whether retrying the call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Timeout | TransportError::ConnectionClosed
        )
    }
}

/// Failure of an endpoint call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The transport failed; passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer answered with an error payload.
    #[error("application error ({})", .0.data_type)]
    Application(Message),

    /// A payload could not be encoded or a response could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CallError {
    /// The generic error payload, if this is one.
    pub fn api_error(&self) -> Option<ApiError> {
        match self {
            CallError::Application(message) => ApiError::from_message(message),
            _ => None,
        }
    }

    /// The application error payload, declared or generic.
    pub fn message(&self) -> Option<&Message> {
        match self {
            CallError::Application(message) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_extraction() {
        let err = CallError::Application(ApiError::not_found("get", "/x").to_message());
        let api_error = err.api_error().unwrap();
        assert_eq!(api_error.code, 404);

        let declared = CallError::Application(Message::new(".app.Rejection", json!({})));
        assert!(declared.api_error().is_none());
        assert_eq!(declared.message().unwrap().data_type, ".app.Rejection");

        let transport = CallError::from(TransportError::Timeout);
        assert!(transport.api_error().is_none());
        assert_eq!(transport.to_string(), "request timeout");
    }

    #[test]
    fn test_retryable() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::ConnectionClosed.is_retryable());
        assert!(!TransportError::NotConnected.is_retryable());
    }
}
