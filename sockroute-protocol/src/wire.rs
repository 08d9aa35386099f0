//! Protobuf-compatible wire primitives.
//!
//! Every field on the wire is a varint key `(field_number << 3) | wire_type`
//! followed by a value whose layout depends on the wire type. Readers operate
//! on `&mut &[u8]` cursors and return a static reason on failure; callers wrap
//! it into a typed error with the message type name attached.

use bytes::{Buf, BufMut};

/// Largest field number allowed by the wire format.
pub(crate) const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Wire types supported by the codec. Groups (3, 4) are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn bits(self) -> u64 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }

    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

pub(crate) fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub(crate) fn get_varint(buf: &mut &[u8]) -> Result<u64, &'static str> {
    let mut value = 0u64;
    // At most 10 bytes encode a u64.
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err("truncated varint");
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err("varint longer than 10 bytes")
}

pub(crate) fn put_tag(buf: &mut impl BufMut, number: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(number) << 3) | wire_type.bits());
}

pub(crate) fn get_tag(buf: &mut &[u8]) -> Result<(u32, WireType), &'static str> {
    let key = get_varint(buf)?;
    let number = key >> 3;
    if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
        return Err("invalid field number");
    }
    let wire_type = WireType::from_bits(key & 0x07).ok_or("unsupported wire type")?;
    Ok((number as u32, wire_type))
}

pub(crate) fn put_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

pub(crate) fn get_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], &'static str> {
    let len = usize::try_from(get_varint(buf)?).map_err(|_| "length overflows usize")?;
    if buf.len() < len {
        return Err("truncated length-delimited field");
    }
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

pub(crate) fn get_fixed32(buf: &mut &[u8]) -> Result<u32, &'static str> {
    if buf.remaining() < 4 {
        return Err("truncated fixed32");
    }
    Ok(buf.get_u32_le())
}

pub(crate) fn get_fixed64(buf: &mut &[u8]) -> Result<u64, &'static str> {
    if buf.remaining() < 8 {
        return Err("truncated fixed64");
    }
    Ok(buf.get_u64_le())
}

/// Skips over the value of an unknown field.
pub(crate) fn skip_field(buf: &mut &[u8], wire_type: WireType) -> Result<(), &'static str> {
    match wire_type {
        WireType::Varint => get_varint(buf).map(drop),
        WireType::Fixed64 => get_fixed64(buf).map(drop),
        WireType::LengthDelimited => get_bytes(buf).map(drop),
        WireType::Fixed32 => get_fixed32(buf).map(drop),
    }
}

pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
