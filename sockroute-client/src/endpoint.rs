//! Typed request/response facade over a [`Transport`].

use crate::error::CallError;
use crate::transport::Transport;
use serde_json::Value;
use sockroute_protocol::{ApiError, CallData, Message, Method, SchemaRoot, API_EVENT};
use std::sync::Arc;

/// Calls remote routes by method and path.
///
/// Payloads are encoded against the shared [`SchemaRoot`] before they leave,
/// and responses are decoded against it when they arrive. An error response
/// becomes [`CallError::Application`].
pub struct Endpoint<T> {
    transport: T,
    schemas: Arc<SchemaRoot>,
    event: String,
}

impl<T: Transport> Endpoint<T> {
    pub fn new(transport: T, schemas: Arc<SchemaRoot>) -> Self {
        Self {
            transport,
            schemas,
            event: API_EVENT.to_string(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn schemas(&self) -> &Arc<SchemaRoot> {
        &self.schemas
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Sends one call and waits for its outcome.
    ///
    /// `payload` is only sent when `data_type` is given. `Ok(None)` means the
    /// handler replied without a value.
    pub async fn call(
        &self,
        method: Method,
        resource: &str,
        data_type: Option<&str>,
        payload: Value,
    ) -> Result<Option<Message>, CallError> {
        let mut call = CallData::new(method, resource);
        if let Some(data_type) = data_type {
            let buffer = self.schemas.encode(data_type, &payload)?;
            call = call.with_payload(data_type, buffer);
        }

        let response = self.transport.emit(&self.event, call).await?;
        let message = response.message(&self.schemas)?;

        if response.is_error {
            // error flag without a payload: nothing more specific to report
            let message = message.unwrap_or_else(|| ApiError::internal().to_message());
            return Err(CallError::Application(message));
        }
        Ok(message)
    }

    pub async fn get(
        &self,
        resource: &str,
        data_type: Option<&str>,
        payload: Value,
    ) -> Result<Option<Message>, CallError> {
        self.call(Method::Get, resource, data_type, payload).await
    }

    pub async fn post(
        &self,
        resource: &str,
        data_type: Option<&str>,
        payload: Value,
    ) -> Result<Option<Message>, CallError> {
        self.call(Method::Post, resource, data_type, payload).await
    }

    pub async fn put(
        &self,
        resource: &str,
        data_type: Option<&str>,
        payload: Value,
    ) -> Result<Option<Message>, CallError> {
        self.call(Method::Put, resource, data_type, payload).await
    }

    pub async fn delete(
        &self,
        resource: &str,
        data_type: Option<&str>,
        payload: Value,
    ) -> Result<Option<Message>, CallError> {
        self.call(Method::Delete, resource, data_type, payload).await
    }
}
