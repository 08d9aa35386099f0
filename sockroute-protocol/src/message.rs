//! Call and response envelopes, the method set and the built-in error payload.
//!
//! Envelopes are plain serde structs. On the wire they are encoded through the
//! [`SchemaRoot`] under their reserved `.sockroute.*` names, so a peer only
//! needs the same schema set to talk to us.

use crate::error::{CodecError, UnknownMethod};
use crate::schema::SchemaRoot;
use crate::{API_CALL_TYPE, API_ERROR_TYPE, API_EVENT, API_RESPONSE_TYPE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Schema of the built-in `sockroute` package.
pub const BUILTIN_SCHEMA: &str = r#"
package: sockroute
messages:
  - name: ApiCall
    fields:
      - { name: cid, id: 1, type: uint32 }
      - { name: event, id: 2, type: string }
      - { name: data, id: 3, type: Data }
    messages:
      - name: Data
        fields:
          - { name: resource, id: 1, type: string }
          - { name: method, id: 2, type: string }
          - { name: dataType, id: 3, type: string }
          - { name: buffer, id: 4, type: bytes }
  - name: ApiResponse
    fields:
      - { name: rid, id: 1, type: uint32 }
      - { name: data, id: 2, type: Data }
    messages:
      - name: Data
        fields:
          - { name: isError, id: 1, type: bool }
          - { name: dataType, id: 2, type: string }
          - { name: buffer, id: 3, type: bytes }
  - name: ApiError
    fields:
      - { name: code, id: 1, type: int32 }
      - { name: reason, id: 2, type: string }
      - { name: description, id: 3, type: string }
"#;

/// Call methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::Get, Method::Post, Method::Put, Method::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Delete => "delete",
        }
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value tagged with the name of the message type it conforms to.
///
/// Used for success payloads and declared application errors alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "dataType")]
    pub data_type: String,
    pub data: Value,
}

impl Message {
    pub fn new(data_type: impl Into<String>, data: Value) -> Self {
        Self {
            data_type: data_type.into(),
            data,
        }
    }

    /// Encodes `data` against `data_type`.
    pub fn encode(&self, schemas: &SchemaRoot) -> Result<Bytes, CodecError> {
        schemas.encode(&self.data_type, &self.data)
    }

    /// Decodes a buffer tagged with `data_type`.
    pub fn decode(
        schemas: &SchemaRoot,
        data_type: impl Into<String>,
        buffer: &[u8],
    ) -> Result<Self, CodecError> {
        let data_type = data_type.into();
        let data = schemas.decode(&data_type, buffer)?;
        Ok(Self { data_type, data })
    }
}

/// Payload of a call envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallData {
    #[serde(default)]
    pub resource: String,

    /// Method token as sent by the peer. Kept as a string so that an unknown
    /// token resolves to "not found" instead of failing to decode.
    #[serde(default)]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_buffer")]
    pub buffer: Option<Bytes>,
}

impl CallData {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            method: method.as_str().to_string(),
            data_type: None,
            buffer: None,
        }
    }

    pub fn with_payload(mut self, data_type: impl Into<String>, buffer: Bytes) -> Self {
        self.data_type = Some(data_type.into());
        self.buffer = Some(buffer);
        self
    }
}

/// Call envelope as it travels over a stream transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    /// Call id, echoed back as the response `rid`.
    #[serde(default)]
    pub cid: u32,

    #[serde(default)]
    pub event: String,

    #[serde(default)]
    pub data: CallData,
}

impl ApiCall {
    pub fn new(cid: u32, data: CallData) -> Self {
        Self {
            cid,
            event: API_EVENT.to_string(),
            data,
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    pub fn encode(&self, schemas: &SchemaRoot) -> Result<Bytes, CodecError> {
        encode_envelope(schemas, API_CALL_TYPE, self)
    }

    pub fn decode(schemas: &SchemaRoot, buf: &[u8]) -> Result<Self, CodecError> {
        decode_envelope(schemas, API_CALL_TYPE, buf)
    }
}

/// Payload of a response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    #[serde(default)]
    pub is_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_buffer")]
    pub buffer: Option<Bytes>,
}

impl ResponseData {
    /// Successful response carrying no payload.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ok(data_type: impl Into<String>, buffer: Bytes) -> Self {
        Self {
            is_error: false,
            data_type: Some(data_type.into()),
            buffer: Some(buffer),
        }
    }

    pub fn error(data_type: impl Into<String>, buffer: Bytes) -> Self {
        Self {
            is_error: true,
            data_type: Some(data_type.into()),
            buffer: Some(buffer),
        }
    }

    /// Encodes an [`ApiError`] as an error response.
    pub fn api_error(schemas: &SchemaRoot, error: &ApiError) -> Result<Self, CodecError> {
        let buffer = error.to_message().encode(schemas)?;
        Ok(Self::error(API_ERROR_TYPE, buffer))
    }

    /// Decodes the payload, if any.
    pub fn message(&self, schemas: &SchemaRoot) -> Result<Option<Message>, CodecError> {
        match &self.data_type {
            Some(data_type) => {
                let buffer = self.buffer.as_deref().unwrap_or_default();
                Message::decode(schemas, data_type.as_str(), buffer).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Response envelope as it travels over a stream transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Id of the call this answers.
    #[serde(default)]
    pub rid: u32,

    #[serde(default)]
    pub data: ResponseData,
}

impl ApiResponse {
    pub fn new(rid: u32, data: ResponseData) -> Self {
        Self { rid, data }
    }

    pub fn encode(&self, schemas: &SchemaRoot) -> Result<Bytes, CodecError> {
        encode_envelope(schemas, API_RESPONSE_TYPE, self)
    }

    pub fn decode(schemas: &SchemaRoot, buf: &[u8]) -> Result<Self, CodecError> {
        decode_envelope(schemas, API_RESPONSE_TYPE, buf)
    }
}

/// Generic error payload for failures that carry no handler-defined shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub description: String,
}

impl ApiError {
    pub fn new(code: i32, reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            description: description.into(),
        }
    }

    pub fn not_found(method: &str, path: &str) -> Self {
        Self::new(
            404,
            "Not Found",
            format!("Could not find a {} handler for path {}.", method, path),
        )
    }

    /// The call arrived on an event nobody listens to.
    pub fn no_listener(event: &str) -> Self {
        Self::new(404, "Not Found", format!("No listener for event {}.", event))
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(400, "Bad Request", description)
    }

    pub fn internal() -> Self {
        Self::new(
            500,
            "Internal Server Error",
            "The server failed to process the request.",
        )
    }

    pub fn to_message(&self) -> Message {
        Message::new(
            API_ERROR_TYPE,
            serde_json::json!({
                "code": self.code,
                "reason": self.reason,
                "description": self.description,
            }),
        )
    }

    /// Reads an `ApiError` back from a decoded message, if it is one.
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.data_type.trim_start_matches('.') != API_ERROR_TYPE.trim_start_matches('.') {
            return None;
        }
        serde_json::from_value(message.data.clone()).ok()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.reason, self.description)
    }
}

fn encode_envelope<T: Serialize>(
    schemas: &SchemaRoot,
    type_name: &str,
    envelope: &T,
) -> Result<Bytes, CodecError> {
    let value = serde_json::to_value(envelope)?;
    schemas.encode(type_name, &value)
}

fn decode_envelope<T: for<'de> Deserialize<'de>>(
    schemas: &SchemaRoot,
    type_name: &str,
    buf: &[u8],
) -> Result<T, CodecError> {
    let value = schemas.decode(type_name, buf)?;
    serde_json::from_value(value).map_err(|e| CodecError::malformed(type_name, e.to_string()))
}

/// Serde adapter for optional buffers carried as hex strings.
mod hex_buffer {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|t| hex::decode(t).map(Bytes::from).map_err(serde::de::Error::custom))
            .transpose()
    }
}
