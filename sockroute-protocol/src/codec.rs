//! Encoder and decoder for framed envelopes.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{ApiCall, ApiResponse};
use crate::schema::SchemaRoot;
use bytes::{Bytes, BytesMut};

/// Encodes envelopes into frames.
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn encode_call(schemas: &SchemaRoot, call: &ApiCall) -> Result<BytesMut, ProtocolError> {
        Frame::new(call.encode(schemas)?).encode()
    }

    pub fn encode_response(
        schemas: &SchemaRoot,
        response: &ApiResponse,
    ) -> Result<BytesMut, ProtocolError> {
        Frame::new(response.encode(schemas)?).encode()
    }
}

/// Buffers partial reads and yields complete envelopes.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next call envelope from the buffer.
    pub fn decode_call(&mut self, schemas: &SchemaRoot) -> Result<Option<ApiCall>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Ok(Some(ApiCall::decode(schemas, &frame.payload)?)),
            None => Ok(None),
        }
    }

    /// Attempts to decode the next response envelope from the buffer.
    pub fn decode_response(
        &mut self,
        schemas: &SchemaRoot,
    ) -> Result<Option<ApiResponse>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Ok(Some(ApiResponse::decode(schemas, &frame.payload)?)),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
