//! # sockroute-protocol
//!
//! Wire protocol implementation for sockroute.
//!
//! This crate provides:
//! - A schema registry of named message types loaded from YAML/JSON sources
//! - Schema-checked binary encoding/decoding of plain `serde_json` values
//! - Call/response envelope types and the built-in error payload
//! - Length-prefixed, CRC32C-checked framing for stream transports

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod schema;
mod wire;

pub use codec::{FrameDecoder, FrameEncoder};
pub use error::{CodecError, ProtocolError, UnknownMethod};
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use message::{ApiCall, ApiError, ApiResponse, CallData, Message, Method, ResponseData};
pub use schema::{
    FieldKind, FieldSchema, MessageType, ScalarType, SchemaRoot, SchemaSource, MAX_NESTING_DEPTH,
};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for a sockroute server.
pub const DEFAULT_PORT: u16 = 8000;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// The single transport event that carries every API call.
pub const API_EVENT: &str = "#api";

/// Package holding the built-in envelope types. User schemas may not declare it.
pub const RESERVED_PACKAGE: &str = "sockroute";

/// Fully-qualified name of the call envelope type.
pub const API_CALL_TYPE: &str = ".sockroute.ApiCall";

/// Fully-qualified name of the response envelope type.
pub const API_RESPONSE_TYPE: &str = ".sockroute.ApiResponse";

/// Fully-qualified name of the generic error payload type.
pub const API_ERROR_TYPE: &str = ".sockroute.ApiError";
