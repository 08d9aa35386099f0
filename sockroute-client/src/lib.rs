//! # sockroute-client
//!
//! Client side of sockroute.
//!
//! This crate provides:
//! - The [`Transport`] trait that delivers a call and yields its acknowledgement
//! - A framed TCP [`Connection`] that correlates responses with pending calls
//! - The [`Endpoint`] facade for typed `get`/`post`/`put`/`delete` calls

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod transport;

pub use connection::{Connection, ConnectionConfig};
pub use endpoint::Endpoint;
pub use error::{CallError, TransportError};
pub use transport::Transport;
