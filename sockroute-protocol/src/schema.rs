//! Schema registry and schema-checked binary codec.
//!
//! Message types are declared in YAML (or JSON) sources:
//!
//! ```yaml
//! package: app
//! messages:
//!   - name: SomeMessage
//!     fields:
//!       - { name: a, id: 1, type: string }
//!       - { name: b, id: 2, type: string, required: true }
//!       - { name: items, id: 3, type: Item, repeated: true }
//!     messages:
//!       - name: Item
//!         fields:
//!           - { name: sku, id: 1, type: uint64 }
//! ```
//!
//! Every source is merged with the built-in `sockroute` package into one
//! [`SchemaRoot`], which is read-only once built. Plain values are
//! `serde_json::Value` objects; `bytes` fields travel as lowercase hex strings.
//! The binary layout is the protobuf wire format.

use crate::error::CodecError;
use crate::message::BUILTIN_SCHEMA;
use crate::wire::{self, WireType};
use crate::RESERVED_PACKAGE;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Deepest message nesting accepted by verify, encode and decode.
pub const MAX_NESTING_DEPTH: usize = 64;

/// One schema document: a package and the messages it declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSource {
    /// Dotted package name; empty for the root namespace.
    #[serde(default)]
    pub package: String,

    /// Top-level messages.
    #[serde(default)]
    pub messages: Vec<MessageDef>,
}

impl SchemaSource {
    /// Parses a source from YAML. JSON documents are accepted as well.
    pub fn from_yaml(text: &str) -> Result<Self, CodecError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Parses a source from an already-loaded JSON value.
    pub fn from_json(value: &Value) -> Result<Self, CodecError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Message declaration as written in a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<FieldDef>,

    /// Nested message declarations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageDef>,
}

/// Field declaration as written in a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    /// Field number on the wire.
    pub id: u32,

    /// Scalar keyword or message reference.
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub repeated: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    /// Parses a scalar keyword.
    pub fn parse(keyword: &str) -> Option<Self> {
        let scalar = match keyword {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        };
        Some(scalar)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    fn wire_type(&self) -> WireType {
        match self {
            ScalarType::Double => WireType::Fixed64,
            ScalarType::Float => WireType::Fixed32,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
            _ => WireType::Varint,
        }
    }

    /// Numeric and boolean scalars are packed when repeated.
    fn is_packable(&self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }

    fn expected(&self) -> &'static str {
        match self {
            ScalarType::Double | ScalarType::Float => "a finite number",
            ScalarType::Int32 | ScalarType::Sint32 => "an integer in the int32 range",
            ScalarType::Uint32 => "an integer in the uint32 range",
            ScalarType::Int64 | ScalarType::Sint64 => "an int64 number or decimal string",
            ScalarType::Uint64 => "a uint64 number or decimal string",
            ScalarType::Bool => "a boolean",
            ScalarType::String => "a string",
            ScalarType::Bytes => "a hex string",
        }
    }
}

/// Resolved type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Fully-qualified name of the referenced message type.
    Message(String),
}

/// A resolved field of a message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub number: u32,
    pub kind: FieldKind,
    pub repeated: bool,
    pub required: bool,
}

/// A resolved, named message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    full_name: String,
    fields: Vec<FieldSchema>,
}

impl MessageType {
    /// Fully-qualified name, including the leading dot.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Unqualified name.
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit('.')
            .next()
            .unwrap_or(self.full_name.as_str())
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.number == number)
    }
}

/// The merged, read-only set of message types.
#[derive(Debug, Clone)]
pub struct SchemaRoot {
    types: HashMap<String, MessageType>,
}

impl SchemaRoot {
    /// Builds a root from user sources merged with the built-in types.
    pub fn new(sources: impl IntoIterator<Item = SchemaSource>) -> Result<Self, CodecError> {
        let builtin = SchemaSource::from_yaml(BUILTIN_SCHEMA)?;
        let mut declared = Vec::new();
        flatten_source(&builtin, &mut declared)?;

        let builtin_count = declared.len();
        for source in sources {
            flatten_source(&source, &mut declared)?;
        }

        let mut names = HashSet::with_capacity(declared.len());
        for (index, (full_name, _)) in declared.iter().enumerate() {
            if index >= builtin_count && is_reserved(full_name) {
                return Err(CodecError::ReservedType(full_name.clone()));
            }
            if !names.insert(full_name.as_str()) {
                return Err(CodecError::DuplicateType(full_name.clone()));
            }
        }

        let mut types = HashMap::with_capacity(declared.len());
        for (full_name, fields) in &declared {
            let fields = resolve_fields(full_name, fields, &names)?;
            types.insert(
                full_name.clone(),
                MessageType {
                    full_name: full_name.clone(),
                    fields,
                },
            );
        }

        Ok(Self { types })
    }

    /// Builds a root holding only the built-in types.
    pub fn builtin() -> Result<Self, CodecError> {
        Self::new(std::iter::empty())
    }

    /// Builds a root from YAML source texts.
    pub fn from_yaml_sources(sources: &[&str]) -> Result<Self, CodecError> {
        let parsed = sources
            .iter()
            .map(|text| SchemaSource::from_yaml(text))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    /// Looks up a message type. The leading dot is optional.
    pub fn lookup_type(&self, name: &str) -> Result<&MessageType, CodecError> {
        let key: Cow<'_, str> = if name.starts_with('.') {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!(".{}", name))
        };
        self.types
            .get(key.as_ref())
            .ok_or_else(|| CodecError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup_type(name).is_ok()
    }

    /// Fully-qualified names of every registered type.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of registered types, built-ins included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Checks that a plain value conforms to the named type.
    pub fn verify(&self, type_name: &str, value: &Value) -> Result<(), CodecError> {
        let ty = self.lookup_type(type_name)?;
        self.verify_message(ty.full_name(), ty, value, "", 0)
    }

    /// Verifies and encodes a plain value. Nothing is written if verification fails.
    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Bytes, CodecError> {
        let ty = self.lookup_type(type_name)?;
        self.verify_message(ty.full_name(), ty, value, "", 0)?;

        let mut buf = BytesMut::new();
        self.write_message(ty, value, &mut buf, 0)?;
        Ok(buf.freeze())
    }

    /// Decodes a buffer into a plain value holding the fields present on the wire.
    pub fn decode(&self, type_name: &str, buf: &[u8]) -> Result<Value, CodecError> {
        let ty = self.lookup_type(type_name)?;
        self.read_message(ty, buf, 0)
    }

    fn verify_message(
        &self,
        root_type: &str,
        ty: &MessageType,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CodecError::violation(
                root_type,
                format!("{}: nesting too deep", display(path)),
            ));
        }
        let object = value.as_object().ok_or_else(|| {
            CodecError::violation(root_type, format!("{}: expected an object", display(path)))
        })?;

        if let Some(key) = object.keys().find(|key| ty.field(key).is_none()) {
            return Err(CodecError::violation(
                root_type,
                format!("unknown field '{}'", join(path, key)),
            ));
        }

        for field in &ty.fields {
            let field_path = join(path, &field.name);
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(CodecError::violation(
                            root_type,
                            format!("missing required field '{}'", field_path),
                        ));
                    }
                }
                Some(value) if field.repeated => {
                    let items = value.as_array().ok_or_else(|| {
                        CodecError::violation(
                            root_type,
                            format!("field '{}': expected an array", field_path),
                        )
                    })?;
                    for (index, item) in items.iter().enumerate() {
                        let item_path = format!("{}[{}]", field_path, index);
                        self.verify_single(root_type, field, item, &item_path, depth)?;
                    }
                }
                Some(value) => self.verify_single(root_type, field, value, &field_path, depth)?,
            }
        }

        Ok(())
    }

    fn verify_single(
        &self,
        root_type: &str,
        field: &FieldSchema,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<(), CodecError> {
        match &field.kind {
            FieldKind::Scalar(scalar) => match to_wire(*scalar, value) {
                Some(_) => Ok(()),
                None => Err(CodecError::violation(
                    root_type,
                    format!("field '{}': expected {}", path, scalar.expected()),
                )),
            },
            FieldKind::Message(name) => {
                let nested = self.lookup_type(name)?;
                self.verify_message(root_type, nested, value, path, depth + 1)
            }
        }
    }

    fn write_message(
        &self,
        ty: &MessageType,
        value: &Value,
        buf: &mut BytesMut,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CodecError::violation(ty.full_name(), "nesting too deep"));
        }
        let object = value
            .as_object()
            .ok_or_else(|| CodecError::violation(ty.full_name(), "expected an object"))?;

        for field in &ty.fields {
            let Some(value) = object.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };

            if !field.repeated {
                self.write_field(ty, field, value, buf, depth)?;
                continue;
            }

            let items = value.as_array().ok_or_else(|| {
                CodecError::violation(ty.full_name(), format!("{}: expected an array", field.name))
            })?;
            if items.is_empty() {
                continue;
            }

            match &field.kind {
                FieldKind::Scalar(scalar) if scalar.is_packable() => {
                    let mut packed = BytesMut::new();
                    for item in items {
                        scalar_or_violation(ty, field, *scalar, item)?.write(&mut packed);
                    }
                    wire::put_tag(buf, field.number, WireType::LengthDelimited);
                    wire::put_bytes(buf, &packed);
                }
                _ => {
                    for item in items {
                        self.write_field(ty, field, item, buf, depth)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn write_field(
        &self,
        ty: &MessageType,
        field: &FieldSchema,
        value: &Value,
        buf: &mut BytesMut,
        depth: usize,
    ) -> Result<(), CodecError> {
        match &field.kind {
            FieldKind::Scalar(scalar) => {
                let encoded = scalar_or_violation(ty, field, *scalar, value)?;
                wire::put_tag(buf, field.number, scalar.wire_type());
                encoded.write(buf);
            }
            FieldKind::Message(name) => {
                let nested = self.lookup_type(name)?;
                let mut inner = BytesMut::new();
                self.write_message(nested, value, &mut inner, depth + 1)?;
                wire::put_tag(buf, field.number, WireType::LengthDelimited);
                wire::put_bytes(buf, &inner);
            }
        }
        Ok(())
    }

    fn read_message(
        &self,
        ty: &MessageType,
        mut buf: &[u8],
        depth: usize,
    ) -> Result<Value, CodecError> {
        let malformed = |reason: &str| CodecError::malformed(ty.full_name(), reason);
        if depth > MAX_NESTING_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        let mut object = Map::new();

        while !buf.is_empty() {
            let (number, wire_type) = wire::get_tag(&mut buf).map_err(malformed)?;
            let Some(field) = ty.field_by_number(number) else {
                wire::skip_field(&mut buf, wire_type).map_err(malformed)?;
                continue;
            };

            let values = self.read_field(ty, field, wire_type, &mut buf, depth)?;
            if field.repeated {
                match object.get_mut(&field.name) {
                    Some(Value::Array(items)) => items.extend(values),
                    _ => {
                        object.insert(field.name.clone(), Value::Array(values));
                    }
                }
            } else if let Some(last) = values.into_iter().last() {
                object.insert(field.name.clone(), last);
            }
        }

        if let Some(missing) = ty
            .fields
            .iter()
            .find(|f| f.required && !object.contains_key(&f.name))
        {
            return Err(malformed(&format!(
                "missing required field '{}'",
                missing.name
            )));
        }

        Ok(Value::Object(object))
    }

    /// Reads one occurrence of a field. Packed repeated scalars yield several values.
    fn read_field(
        &self,
        ty: &MessageType,
        field: &FieldSchema,
        wire_type: WireType,
        buf: &mut &[u8],
        depth: usize,
    ) -> Result<Vec<Value>, CodecError> {
        let malformed = |reason: &str| CodecError::malformed(ty.full_name(), reason);

        match &field.kind {
            FieldKind::Scalar(scalar) => {
                if field.repeated
                    && scalar.is_packable()
                    && wire_type == WireType::LengthDelimited
                {
                    let mut payload = wire::get_bytes(buf).map_err(malformed)?;
                    let mut values = Vec::new();
                    while !payload.is_empty() {
                        values.push(read_scalar(*scalar, &mut payload).map_err(malformed)?);
                    }
                    Ok(values)
                } else if wire_type == scalar.wire_type() {
                    Ok(vec![read_scalar(*scalar, buf).map_err(malformed)?])
                } else {
                    Err(malformed(&format!(
                        "field '{}' has wire type {:?}, expected {:?}",
                        field.name,
                        wire_type,
                        scalar.wire_type()
                    )))
                }
            }
            FieldKind::Message(name) => {
                if wire_type != WireType::LengthDelimited {
                    return Err(malformed(&format!(
                        "field '{}' has wire type {:?}, expected {:?}",
                        field.name,
                        wire_type,
                        WireType::LengthDelimited
                    )));
                }
                let payload = wire::get_bytes(buf).map_err(malformed)?;
                let nested = self.lookup_type(name)?;
                Ok(vec![self.read_message(nested, payload, depth + 1)?])
            }
        }
    }
}

/// A scalar converted to its wire representation.
enum WireScalar<'a> {
    Varint(u64),
    Fixed32(u32),
    Fixed64(u64),
    Bytes(Cow<'a, [u8]>),
}

impl WireScalar<'_> {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            WireScalar::Varint(v) => wire::put_varint(buf, *v),
            WireScalar::Fixed32(v) => buf.put_u32_le(*v),
            WireScalar::Fixed64(v) => buf.put_u64_le(*v),
            WireScalar::Bytes(bytes) => wire::put_bytes(buf, bytes),
        }
    }
}

fn scalar_or_violation<'a>(
    ty: &MessageType,
    field: &FieldSchema,
    scalar: ScalarType,
    value: &'a Value,
) -> Result<WireScalar<'a>, CodecError> {
    to_wire(scalar, value).ok_or_else(|| {
        CodecError::violation(
            ty.full_name(),
            format!("field '{}': expected {}", field.name, scalar.expected()),
        )
    })
}

fn to_wire(scalar: ScalarType, value: &Value) -> Option<WireScalar<'_>> {
    let encoded = match scalar {
        ScalarType::Double => WireScalar::Fixed64(value.as_f64()?.to_bits()),
        ScalarType::Float => {
            let v = value.as_f64()?;
            if v.abs() > f64::from(f32::MAX) {
                return None;
            }
            WireScalar::Fixed32((v as f32).to_bits())
        }
        ScalarType::Int32 => {
            let v = i32::try_from(value.as_i64()?).ok()?;
            WireScalar::Varint(i64::from(v) as u64)
        }
        ScalarType::Int64 => WireScalar::Varint(int64_of(value)? as u64),
        ScalarType::Uint32 => WireScalar::Varint(u64::from(u32::try_from(value.as_u64()?).ok()?)),
        ScalarType::Uint64 => WireScalar::Varint(uint64_of(value)?),
        ScalarType::Sint32 => {
            let v = i32::try_from(value.as_i64()?).ok()?;
            WireScalar::Varint(wire::zigzag_encode(i64::from(v)))
        }
        ScalarType::Sint64 => WireScalar::Varint(wire::zigzag_encode(int64_of(value)?)),
        ScalarType::Bool => WireScalar::Varint(u64::from(value.as_bool()?)),
        ScalarType::String => WireScalar::Bytes(Cow::Borrowed(value.as_str()?.as_bytes())),
        ScalarType::Bytes => WireScalar::Bytes(Cow::Owned(hex::decode(value.as_str()?).ok()?)),
    };
    Some(encoded)
}

fn int64_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn uint64_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn read_scalar(scalar: ScalarType, buf: &mut &[u8]) -> Result<Value, &'static str> {
    let value = match scalar {
        ScalarType::Double => {
            let v = f64::from_bits(wire::get_fixed64(buf)?);
            Value::Number(Number::from_f64(v).ok_or("non-finite double")?)
        }
        ScalarType::Float => {
            let v = f32::from_bits(wire::get_fixed32(buf)?);
            Value::Number(Number::from_f64(f64::from(v)).ok_or("non-finite float")?)
        }
        ScalarType::Int32 => Value::from(wire::get_varint(buf)? as i32),
        ScalarType::Int64 => Value::from(wire::get_varint(buf)? as i64),
        ScalarType::Uint32 => Value::from(wire::get_varint(buf)? as u32),
        ScalarType::Uint64 => Value::from(wire::get_varint(buf)?),
        ScalarType::Sint32 => Value::from(wire::zigzag_decode(wire::get_varint(buf)?) as i32),
        ScalarType::Sint64 => Value::from(wire::zigzag_decode(wire::get_varint(buf)?)),
        ScalarType::Bool => Value::Bool(wire::get_varint(buf)? != 0),
        ScalarType::String => {
            let bytes = wire::get_bytes(buf)?;
            Value::String(std::str::from_utf8(bytes).map_err(|_| "invalid UTF-8 in string")?.to_string())
        }
        ScalarType::Bytes => Value::String(hex::encode(wire::get_bytes(buf)?)),
    };
    Ok(value)
}

fn flatten_source(
    source: &SchemaSource,
    out: &mut Vec<(String, Vec<FieldDef>)>,
) -> Result<(), CodecError> {
    let prefix = if source.package.is_empty() {
        String::new()
    } else {
        format!(".{}", source.package)
    };
    flatten_messages(&prefix, &source.messages, out)
}

fn flatten_messages(
    prefix: &str,
    messages: &[MessageDef],
    out: &mut Vec<(String, Vec<FieldDef>)>,
) -> Result<(), CodecError> {
    for message in messages {
        if message.name.is_empty() || message.name.contains('.') {
            return Err(CodecError::InvalidSchema(format!(
                "invalid message name '{}' in '{}'",
                message.name,
                display(prefix)
            )));
        }
        let full_name = format!("{}.{}", prefix, message.name);
        out.push((full_name.clone(), message.fields.clone()));
        flatten_messages(&full_name, &message.messages, out)?;
    }
    Ok(())
}

fn is_reserved(full_name: &str) -> bool {
    let reserved = format!(".{}", RESERVED_PACKAGE);
    full_name == reserved || full_name.starts_with(&format!("{}.", reserved))
}

fn resolve_fields(
    full_name: &str,
    fields: &[FieldDef],
    names: &HashSet<&str>,
) -> Result<Vec<FieldSchema>, CodecError> {
    let mut seen_names = HashSet::new();
    let mut seen_numbers = HashSet::new();
    let mut resolved = Vec::with_capacity(fields.len());

    for field in fields {
        let invalid = |reason: String| {
            CodecError::InvalidSchema(format!("{}.{}: {}", full_name, field.name, reason))
        };

        if field.name.is_empty() {
            return Err(invalid("empty field name".to_string()));
        }
        if field.id == 0 || field.id > wire::MAX_FIELD_NUMBER {
            return Err(invalid(format!("field number {} out of range", field.id)));
        }
        if !seen_names.insert(field.name.as_str()) {
            return Err(invalid("duplicate field name".to_string()));
        }
        if !seen_numbers.insert(field.id) {
            return Err(invalid(format!("duplicate field number {}", field.id)));
        }
        if field.repeated && field.required {
            return Err(invalid("a field cannot be both repeated and required".to_string()));
        }

        let kind = match ScalarType::parse(&field.type_name) {
            Some(scalar) => FieldKind::Scalar(scalar),
            None => match resolve_reference(full_name, &field.type_name, names) {
                Some(target) => FieldKind::Message(target),
                None => {
                    return Err(invalid(format!("unresolved type '{}'", field.type_name)));
                }
            },
        };

        resolved.push(FieldSchema {
            name: field.name.clone(),
            number: field.id,
            kind,
            repeated: field.repeated,
            required: field.required,
        });
    }

    Ok(resolved)
}

/// Resolves a type reference from inside `scope`, innermost scope first.
fn resolve_reference(scope: &str, reference: &str, names: &HashSet<&str>) -> Option<String> {
    if reference.starts_with('.') {
        return names.contains(reference).then(|| reference.to_string());
    }

    let mut scope = scope;
    loop {
        let candidate = format!("{}.{}", scope, reference);
        if names.contains(candidate.as_str()) {
            return Some(candidate);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope.rfind('.').map_or("", |index| &scope[..index]);
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const APP_SCHEMA: &str = r#"
package: app
messages:
  - name: SomeMessage
    fields:
      - { name: a, id: 1, type: string }
      - { name: b, id: 2, type: string }
  - name: SomeResponse
    fields:
      - { name: c, id: 1, type: string }
  - name: Order
    fields:
      - { name: id, id: 1, type: uint64, required: true }
      - { name: lines, id: 2, type: Line, repeated: true }
      - { name: note, id: 3, type: string }
    messages:
      - name: Line
        fields:
          - { name: sku, id: 1, type: string, required: true }
          - { name: qty, id: 2, type: int32 }
"#;

    const SAMPLE_SCHEMA: &str = r#"
package: test
messages:
  - name: Sample
    fields:
      - { name: text, id: 1, type: string }
      - { name: count, id: 2, type: int32 }
      - { name: big, id: 3, type: int64 }
      - { name: small, id: 4, type: uint32 }
      - { name: signed, id: 5, type: sint64 }
      - { name: ratio, id: 6, type: double }
      - { name: flag, id: 7, type: bool }
      - { name: blob, id: 8, type: bytes }
      - { name: tags, id: 9, type: string, repeated: true }
      - { name: scores, id: 10, type: sint32, repeated: true }
      - { name: inner, id: 11, type: Inner }
      - { name: children, id: 12, type: Inner, repeated: true }
    messages:
      - name: Inner
        fields:
          - { name: label, id: 1, type: string, required: true }
          - { name: weight, id: 2, type: uint64 }
"#;

    fn app_root() -> SchemaRoot {
        SchemaRoot::from_yaml_sources(&[APP_SCHEMA]).unwrap()
    }

    #[test]
    fn test_builtin_types_always_present() {
        let root = SchemaRoot::builtin().unwrap();
        assert!(root.contains(crate::API_CALL_TYPE));
        assert!(root.contains(".sockroute.ApiCall.Data"));
        assert!(root.contains(crate::API_RESPONSE_TYPE));
        assert!(root.contains(".sockroute.ApiResponse.Data"));
        assert!(root.contains(crate::API_ERROR_TYPE));
        assert_eq!(root.len(), 5);

        let root = app_root();
        assert!(root.contains(crate::API_ERROR_TYPE));
        assert!(root.contains(".app.SomeMessage"));
    }

    #[test]
    fn test_lookup_with_and_without_leading_dot() {
        let root = app_root();
        let with_dot = root.lookup_type(".app.SomeResponse").unwrap();
        let without_dot = root.lookup_type("app.SomeResponse").unwrap();
        assert_eq!(with_dot, without_dot);
        assert_eq!(with_dot.name(), "SomeResponse");
        assert_eq!(with_dot.full_name(), ".app.SomeResponse");
    }

    #[test]
    fn test_unknown_type() {
        let root = app_root();
        assert!(matches!(
            root.lookup_type(".app.Missing"),
            Err(CodecError::UnknownType(_))
        ));
        assert!(matches!(
            root.decode(".app.Missing", &[]),
            Err(CodecError::UnknownType(_))
        ));
        assert!(matches!(
            root.encode(".app.Missing", &json!({})),
            Err(CodecError::UnknownType(_))
        ));
    }

    #[test]
    fn test_nested_reference_resolution() {
        let root = app_root();
        let order = root.lookup_type(".app.Order").unwrap();
        let lines = order.field("lines").unwrap();
        assert_eq!(lines.kind, FieldKind::Message(".app.Order.Line".to_string()));
        assert!(lines.repeated);
    }

    #[test]
    fn test_absolute_and_outer_scope_references() {
        let root = SchemaRoot::from_yaml_sources(&[r#"
package: shop
messages:
  - name: Money
    fields:
      - { name: cents, id: 1, type: int64 }
  - name: Cart
    fields:
      - { name: total, id: 1, type: Money }
      - { name: error, id: 2, type: .sockroute.ApiError }
"#])
        .unwrap();
        let cart = root.lookup_type(".shop.Cart").unwrap();
        assert_eq!(
            cart.field("total").unwrap().kind,
            FieldKind::Message(".shop.Money".to_string())
        );
        assert_eq!(
            cart.field("error").unwrap().kind,
            FieldKind::Message(".sockroute.ApiError".to_string())
        );
    }

    #[test]
    fn test_reserved_package_rejected() {
        let result = SchemaRoot::from_yaml_sources(&[r#"
package: sockroute
messages:
  - name: ApiError
    fields:
      - { name: code, id: 1, type: string }
"#]);
        assert!(matches!(result, Err(CodecError::ReservedType(name)) if name == ".sockroute.ApiError"));

        let result = SchemaRoot::from_yaml_sources(&[r#"
messages:
  - name: sockroute
    messages:
      - name: Extra
"#]);
        assert!(matches!(result, Err(CodecError::ReservedType(_))));
    }

    #[test]
    fn test_duplicate_type_across_sources() {
        let result = SchemaRoot::from_yaml_sources(&[APP_SCHEMA, APP_SCHEMA]);
        assert!(matches!(result, Err(CodecError::DuplicateType(_))));
    }

    #[test]
    fn test_invalid_schemas() {
        let cases = [
            // unresolved reference
            "messages: [{ name: A, fields: [{ name: x, id: 1, type: Nope }] }]",
            // duplicate field number
            "messages: [{ name: A, fields: [{ name: x, id: 1, type: string }, { name: y, id: 1, type: string }] }]",
            // duplicate field name
            "messages: [{ name: A, fields: [{ name: x, id: 1, type: string }, { name: x, id: 2, type: string }] }]",
            // field number zero
            "messages: [{ name: A, fields: [{ name: x, id: 0, type: string }] }]",
            // repeated and required
            "messages: [{ name: A, fields: [{ name: x, id: 1, type: string, repeated: true, required: true }] }]",
            // dotted message name
            "messages: [{ name: A.B }]",
        ];
        for case in cases {
            let result = SchemaRoot::from_yaml_sources(&[case]);
            assert!(
                matches!(result, Err(CodecError::InvalidSchema(_))),
                "expected InvalidSchema for {case}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_json_source() {
        let source = SchemaSource::from_json(&json!({
            "package": "j",
            "messages": [{"name": "Ping", "fields": [{"name": "n", "id": 1, "type": "uint32"}]}]
        }))
        .unwrap();
        let root = SchemaRoot::new([source]).unwrap();
        let encoded = root.encode(".j.Ping", &json!({"n": 7})).unwrap();
        assert_eq!(root.decode(".j.Ping", &encoded).unwrap(), json!({"n": 7}));
    }

    #[test]
    fn test_encode_matches_protobuf_layout() {
        let root = app_root();
        let encoded = root.encode(".app.SomeResponse", &json!({"c": "x"})).unwrap();
        // field 1, wire type 2, length 1, 'x'
        assert_eq!(encoded.as_ref(), &[0x0A, 0x01, b'x']);
    }

    #[test]
    fn test_scenario_roundtrip() {
        let root = app_root();
        let value = json!({"c": "something dark"});
        let encoded = root.encode(".app.SomeResponse", &value).unwrap();
        assert_eq!(root.decode(".app.SomeResponse", &encoded).unwrap(), value);
    }

    #[test]
    fn test_nested_repeated_roundtrip() {
        let root = app_root();
        let value = json!({
            "id": 42,
            "lines": [{"sku": "a-1", "qty": 2}, {"sku": "b-2", "qty": -1}],
            "note": ""
        });
        let encoded = root.encode(".app.Order", &value).unwrap();
        assert_eq!(root.decode(".app.Order", &encoded).unwrap(), value);
    }

    #[test]
    fn test_absent_null_and_empty_are_equivalent() {
        let root = app_root();
        let with_nulls = json!({"id": 1, "lines": [], "note": null});
        let encoded = root.encode(".app.Order", &with_nulls).unwrap();
        assert_eq!(root.decode(".app.Order", &encoded).unwrap(), json!({"id": 1}));
    }

    #[test]
    fn test_verify_missing_required() {
        let root = app_root();
        let err = root.encode(".app.Order", &json!({"note": "x"})).unwrap_err();
        match err {
            CodecError::SchemaViolation { type_name, reason } => {
                assert_eq!(type_name, ".app.Order");
                assert!(reason.contains("missing required field 'id'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = root
            .verify(".app.Order", &json!({"id": 1, "lines": [{"qty": 1}]}))
            .unwrap_err();
        assert!(err.to_string().contains("lines[0].sku"));
    }

    #[test]
    fn test_verify_wrong_types() {
        let root = app_root();
        let cases = [
            json!({"a": 12}),
            json!({"a": ["x"]}),
            json!({"b": {"nested": true}}),
            json!("not an object"),
        ];
        for value in cases {
            assert!(
                matches!(
                    root.encode(".app.SomeMessage", &value),
                    Err(CodecError::SchemaViolation { .. })
                ),
                "expected violation for {value}"
            );
        }
    }

    #[test]
    fn test_verify_rejects_unknown_fields() {
        let root = app_root();
        let err = root
            .verify(".app.SomeMessage", &json!({"a": "x", "z": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("unknown field 'z'"));
    }

    #[test]
    fn test_verify_integer_ranges() {
        let root = SchemaRoot::from_yaml_sources(&[r#"
package: n
messages:
  - name: Nums
    fields:
      - { name: i, id: 1, type: int32 }
      - { name: u, id: 2, type: uint32 }
      - { name: l, id: 3, type: int64 }
      - { name: f, id: 4, type: float }
"#])
        .unwrap();
        assert!(root.verify(".n.Nums", &json!({"i": -5, "u": 5})).is_ok());
        assert!(root.verify(".n.Nums", &json!({"i": 1_u64 << 40})).is_err());
        assert!(root.verify(".n.Nums", &json!({"u": -1})).is_err());
        assert!(root.verify(".n.Nums", &json!({"i": 1.5})).is_err());
        assert!(root.verify(".n.Nums", &json!({"l": "-9000000000"})).is_ok());
        assert!(root.verify(".n.Nums", &json!({"l": "abc"})).is_err());
        assert!(root.verify(".n.Nums", &json!({"f": 1.0e300})).is_err());

        let encoded = root.encode(".n.Nums", &json!({"l": "-9000000000"})).unwrap();
        assert_eq!(
            root.decode(".n.Nums", &encoded).unwrap(),
            json!({"l": -9_000_000_000_i64})
        );
    }

    #[test]
    fn test_bytes_fields_are_hex() {
        let root = SchemaRoot::from_yaml_sources(&[
            "package: b\nmessages: [{ name: Blob, fields: [{ name: data, id: 1, type: bytes }] }]",
        ])
        .unwrap();
        let encoded = root.encode(".b.Blob", &json!({"data": "00ff10"})).unwrap();
        assert_eq!(encoded.as_ref(), &[0x0A, 0x03, 0x00, 0xFF, 0x10]);
        assert_eq!(
            root.decode(".b.Blob", &encoded).unwrap(),
            json!({"data": "00ff10"})
        );
        assert!(root.encode(".b.Blob", &json!({"data": "zz"})).is_err());
    }

    #[test]
    fn test_decode_skips_unknown_fields() {
        let root = app_root();
        let mut buf = Vec::new();
        wire::put_tag(&mut buf, 9, WireType::Varint);
        wire::put_varint(&mut buf, 99);
        wire::put_tag(&mut buf, 1, WireType::LengthDelimited);
        wire::put_bytes(&mut buf, b"x");
        assert_eq!(
            root.decode(".app.SomeResponse", &buf).unwrap(),
            json!({"c": "x"})
        );
    }

    #[test]
    fn test_decode_accepts_unpacked_repeated_scalars() {
        let root = SchemaRoot::from_yaml_sources(&[
            "package: r\nmessages: [{ name: List, fields: [{ name: xs, id: 1, type: uint32, repeated: true }] }]",
        ])
        .unwrap();
        let mut buf = Vec::new();
        for x in [1u64, 2, 3] {
            wire::put_tag(&mut buf, 1, WireType::Varint);
            wire::put_varint(&mut buf, x);
        }
        assert_eq!(root.decode(".r.List", &buf).unwrap(), json!({"xs": [1, 2, 3]}));

        // and the packed form we produce ourselves
        let packed = root.encode(".r.List", &json!({"xs": [1, 2, 3]})).unwrap();
        assert_eq!(packed.as_ref(), &[0x0A, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_decode_malformed_input() {
        let root = app_root();

        // truncated length-delimited string
        let err = root.decode(".app.SomeResponse", &[0x0A, 0x05, b'x']).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));

        // wrong wire type for a string field
        let err = root.decode(".app.SomeResponse", &[0x08, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));

        // invalid UTF-8
        let err = root.decode(".app.SomeResponse", &[0x0A, 0x01, 0xFF]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));

        // missing required field
        let err = root.decode(".app.Order", &[]).unwrap_err();
        assert!(err.to_string().contains("missing required field 'id'"));
    }

    const TREE_SCHEMA: &str = r#"
package: tree
messages:
  - name: Node
    fields:
      - { name: label, id: 1, type: string }
      - { name: child, id: 2, type: Node }
"#;

    /// `levels` nested `child` fields, built innermost first.
    fn nested_node_buffer(levels: usize) -> Vec<u8> {
        let mut reversed = Vec::new();
        for _ in 0..levels {
            let mut header = vec![0x12];
            wire::put_varint(&mut header, reversed.len() as u64);
            reversed.extend(header.iter().rev());
        }
        reversed.reverse();
        reversed
    }

    fn nested_node_value(levels: usize) -> Value {
        let mut value = json!({ "label": "leaf" });
        for _ in 0..levels {
            value = json!({ "child": value });
        }
        value
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let root = SchemaRoot::from_yaml_sources(&[TREE_SCHEMA]).unwrap();

        let shallow = nested_node_value(10);
        let encoded = root.encode(".tree.Node", &shallow).unwrap();
        assert_eq!(root.decode(".tree.Node", &encoded).unwrap(), shallow);

        let err = root
            .decode(".tree.Node", &nested_node_buffer(100_000))
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
        assert!(err.to_string().contains("nesting too deep"));

        let limit = nested_node_buffer(MAX_NESTING_DEPTH);
        assert!(root.decode(".tree.Node", &limit).is_ok());
        let past_limit = nested_node_buffer(MAX_NESTING_DEPTH + 1);
        assert!(root.decode(".tree.Node", &past_limit).is_err());

        let deep = nested_node_value(MAX_NESTING_DEPTH + 1);
        let err = root.verify(".tree.Node", &deep).unwrap_err();
        assert!(matches!(err, CodecError::SchemaViolation { .. }));
        assert!(err.to_string().contains("nesting too deep"));
        assert!(root.encode(".tree.Node", &deep).is_err());
    }

    #[test]
    fn test_empty_message_roundtrip() {
        let root = app_root();
        let encoded = root.encode(".app.SomeMessage", &json!({})).unwrap();
        assert!(encoded.is_empty());
        assert_eq!(root.decode(".app.SomeMessage", &encoded).unwrap(), json!({}));
    }

    #[test]
    fn test_source_serializes_back() {
        let source = SchemaSource::from_yaml(APP_SCHEMA).unwrap();
        let yaml = serde_yaml::to_string(&source).unwrap();
        assert_eq!(SchemaSource::from_yaml(&yaml).unwrap(), source);
    }

    fn sample_root() -> SchemaRoot {
        SchemaRoot::from_yaml_sources(&[SAMPLE_SCHEMA]).unwrap()
    }

    fn inner_strategy() -> impl Strategy<Value = Value> {
        ("[a-z]{0,8}", proptest::option::of(any::<u64>())).prop_map(|(label, weight)| {
            let mut object = Map::new();
            object.insert("label".to_string(), Value::from(label));
            if let Some(weight) = weight {
                object.insert("weight".to_string(), Value::from(weight));
            }
            Value::Object(object)
        })
    }

    fn sample_strategy() -> impl Strategy<Value = Value> {
        let scalars = (
            proptest::option::of("[ -~]{0,16}"),
            proptest::option::of(any::<i32>()),
            proptest::option::of(any::<i64>()),
            proptest::option::of(any::<u32>()),
            proptest::option::of(any::<i64>()),
            proptest::option::of(-1.0e12f64..1.0e12f64),
        );
        let rest = (
            proptest::option::of(any::<bool>()),
            proptest::option::of(proptest::collection::vec(any::<u8>(), 0..16)),
            proptest::option::of(proptest::collection::vec("[a-z]{0,6}", 1..4)),
            proptest::option::of(proptest::collection::vec(any::<i32>(), 1..4)),
            proptest::option::of(inner_strategy()),
            proptest::option::of(proptest::collection::vec(inner_strategy(), 1..3)),
        );

        (scalars, rest).prop_map(
            |(
                (text, count, big, small, signed, ratio),
                (flag, blob, tags, scores, inner, children),
            )| {
                let mut object = Map::new();
                let mut put = |key: &str, value: Option<Value>| {
                    if let Some(value) = value {
                        object.insert(key.to_string(), value);
                    }
                };
                put("text", text.map(Value::from));
                put("count", count.map(Value::from));
                put("big", big.map(Value::from));
                put("small", small.map(Value::from));
                put("signed", signed.map(Value::from));
                put("ratio", ratio.map(Value::from));
                put("flag", flag.map(Value::from));
                put("blob", blob.map(|b| Value::from(hex::encode(b))));
                put("tags", tags.map(Value::from));
                put("scores", scores.map(Value::from));
                put("inner", inner);
                put("children", children.map(Value::Array));
                Value::Object(object)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_conforming_values_roundtrip(value in sample_strategy()) {
            let root = sample_root();
            let encoded = root.encode(".test.Sample", &value).unwrap();
            let decoded = root.decode(".test.Sample", &encoded).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
