//! Call dispatch.
//!
//! The dispatcher owns the flattened route list. Every call it receives is
//! answered with exactly one [`ResponseData`], whatever the handler does.

use crate::error::DispatchError;
use crate::handler::{HandlerError, Reply};
use crate::router::{Route, RouteTable};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use sockroute_protocol::{ApiError, CallData, CodecError, Message, ResponseData, SchemaRoot};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub calls_total: AtomicU64,
    pub not_found_total: AtomicU64,
    pub bad_requests_total: AtomicU64,
    pub declared_errors_total: AtomicU64,
    pub faults_total: AtomicU64,
}

pub struct Dispatcher {
    routes: Vec<Route>,
    schemas: Arc<SchemaRoot>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Flattens `table` once. The table cannot change afterwards.
    pub fn new(table: RouteTable, schemas: Arc<SchemaRoot>) -> Self {
        let routes = table.routes();
        tracing::debug!("Dispatcher ready with {} routes", routes.len());
        Self {
            routes,
            schemas,
            stats: DispatchStats::default(),
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaRoot> {
        &self.schemas
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Finds the first route matching `method` and `resource` exactly.
    pub fn resolve(&self, method: &str, resource: &str) -> Result<&Route, DispatchError> {
        let path = if resource.starts_with('/') {
            resource.to_string()
        } else {
            format!("/{}", resource)
        };

        self.routes
            .iter()
            .find(|route| route.method.as_str() == method && route.path == path)
            .ok_or(DispatchError::NotFound {
                method: method.to_string(),
                path,
            })
    }

    /// Handles one call.
    pub async fn handle(&self, call: &CallData) -> ResponseData {
        self.stats.calls_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Dispatching {} {}", call.method, call.resource);

        let payload = match self.decode_payload(call) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(
                    "Undecodable payload for {} {}: {}",
                    call.method,
                    call.resource,
                    e
                );
                self.stats.bad_requests_total.fetch_add(1, Ordering::Relaxed);
                return self.api_error(&ApiError::bad_request(format!(
                    "Could not decode the request payload: {}",
                    e
                )));
            }
        };

        let route = match self.resolve(&call.method, &call.resource) {
            Ok(route) => route,
            Err(DispatchError::NotFound { method, path }) => {
                tracing::debug!("No route for {} {}", method, path);
                self.stats.not_found_total.fetch_add(1, Ordering::Relaxed);
                return self.api_error(&ApiError::not_found(&method, &path));
            }
        };

        let handler = route.handler.clone();
        let outcome = AssertUnwindSafe(async move { handler.call(payload).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Reply::Empty)) => ResponseData::empty(),
            Ok(Ok(Reply::Message(message))) => match self.encode(&message) {
                Ok(buffer) => ResponseData::ok(message.data_type, buffer),
                Err(e) => self.encode_failure(route, &message, e),
            },
            Ok(Err(HandlerError::Declared(message))) => {
                self.stats
                    .declared_errors_total
                    .fetch_add(1, Ordering::Relaxed);
                match self.encode(&message) {
                    Ok(buffer) => ResponseData::error(message.data_type, buffer),
                    Err(e) => self.encode_failure(route, &message, e),
                }
            }
            Ok(Err(HandlerError::Fault(e))) => {
                tracing::error!("Handler for {} {} failed: {}", route.method, route.path, e);
                self.internal_error()
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    "Handler for {} {} panicked: {}",
                    route.method,
                    route.path,
                    reason
                );
                self.internal_error()
            }
        }
    }

    fn decode_payload(&self, call: &CallData) -> Result<Value, CodecError> {
        match &call.data_type {
            Some(data_type) => {
                let buffer = call.buffer.as_deref().unwrap_or_default();
                self.schemas.decode(data_type, buffer)
            }
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn encode(&self, message: &Message) -> Result<bytes::Bytes, CodecError> {
        message.encode(&self.schemas)
    }

    fn encode_failure(&self, route: &Route, message: &Message, e: CodecError) -> ResponseData {
        tracing::error!(
            "Failed to encode {} from {} {}: {}",
            message.data_type,
            route.method,
            route.path,
            e
        );
        self.internal_error()
    }

    fn internal_error(&self) -> ResponseData {
        self.stats.faults_total.fetch_add(1, Ordering::Relaxed);
        self.api_error(&ApiError::internal())
    }

    /// Encodes a generic error response. Falls back to a bare error flag if the
    /// built-in error type itself cannot be encoded.
    pub fn api_error(&self, error: &ApiError) -> ResponseData {
        ResponseData::api_error(&self.schemas, error).unwrap_or_else(|e| {
            tracing::error!("Failed to encode ApiError: {}", e);
            ResponseData {
                is_error: true,
                data_type: None,
                buffer: None,
            }
        })
    }
}
