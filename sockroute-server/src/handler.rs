//! Handler model.
//!
//! A handler receives the decoded call payload and resolves to a [`Reply`] or a
//! [`HandlerError`]. Plain async closures are handlers:
//!
//! ```ignore
//! let handler = handler_fn(|payload: Value| async move {
//!     Ok(Reply::message(".app.SomeResponse", json!({ "c": payload["a"] })))
//! });
//! ```

use serde_json::Value;
use sockroute_protocol::Message;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Successful handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The response carries no payload.
    Empty,
    Message(Message),
}

impl Reply {
    pub fn message(data_type: impl Into<String>, data: Value) -> Self {
        Reply::Message(Message::new(data_type, data))
    }
}

impl From<Message> for Reply {
    fn from(message: Message) -> Self {
        Reply::Message(message)
    }
}

/// Failed handler outcome.
///
/// Any `std::error::Error` converts into [`HandlerError::Fault`], so `?` can be
/// used freely inside handlers. Faults never reach the caller.
pub enum HandlerError {
    /// Application error with its own response schema, passed to the caller as is.
    Declared(Message),
    /// Anything else.
    Fault(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn declared(data_type: impl Into<String>, data: Value) -> Self {
        HandlerError::Declared(Message::new(data_type, data))
    }

    pub fn fault(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        HandlerError::Fault(reason.into())
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::Fault(Box::new(err))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Declared(message) => f.debug_tuple("Declared").field(message).finish(),
            HandlerError::Fault(err) => f.debug_tuple("Fault").field(err).finish(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Declared(message) => {
                write!(f, "declared error of type {}", message.data_type)
            }
            HandlerError::Fault(err) => write!(f, "handler fault: {}", err),
        }
    }
}

pub type HandlerResult = Result<Reply, HandlerError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// An invocable route target.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, payload: Value) -> HandlerFuture;

    /// Human-readable description reported by route listings.
    fn description(&self) -> Option<&str> {
        None
    }
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        Box::pin(self(payload))
    }
}

/// Pins down closure argument and result types so that bare closures can be
/// registered without annotations.
pub fn handler_fn<F, Fut>(f: F) -> F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    f
}

/// A handler carrying a description.
pub struct Described<H> {
    description: String,
    inner: H,
}

impl<H: Handler> Handler for Described<H> {
    fn call(&self, payload: Value) -> HandlerFuture {
        self.inner.call(payload)
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }
}

/// Attaches a description to a handler.
pub fn described<H: Handler>(description: impl Into<String>, handler: H) -> Described<H> {
    Described {
        description: description.into(),
        inner: handler,
    }
}
