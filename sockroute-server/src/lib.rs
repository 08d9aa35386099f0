//! # sockroute-server
//!
//! Server side of sockroute.
//!
//! This crate provides:
//! - Route tables keyed by method and path, with nested sub-tables
//! - The dispatcher that turns a call into exactly one response
//! - Async handler trait with declared errors and fault isolation
//! - A framed TCP server multiplexing calls over one event
//! - YAML configuration with environment overrides

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod session;

pub use config::{ApiConfig, Config, NetworkConfig};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{ConfigError, DispatchError, ServerError};
pub use handler::{
    described, handler_fn, Described, Handler, HandlerError, HandlerFuture, HandlerResult, Reply,
};
pub use router::{HandlerNode, Route, RouteDescription, RouteEntry, RouteTable};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::Session;
