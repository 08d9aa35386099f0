//! Stream framing for envelopes.
//!
//! Frame layout (16 bytes header + payload):
//!
//! ```text
//! +--------+---------+--------+-------------+--------+---------------------+
//! | magic  | version | flags  | payload_len | crc32c | payload             |
//! | 4 bytes| 2 bytes |2 bytes |   4 bytes   | 4 bytes| payload_len bytes   |
//! +--------+---------+--------+-------------+--------+---------------------+
//! ```
//!
//! All integers are big-endian. The payload is one encoded envelope.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes identifying sockroute frames.
pub const MAGIC: [u8; 4] = *b"SKRT";

/// Size of the fixed frame header in bytes (4+2+2+4+4 = 16).
pub const FRAME_HEADER_SIZE: usize = 16;

/// Frame flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// CRC32C checksum of the payload is present.
    pub const CRC_PRESENT: u16 = 1 << 0;

    const VALID_MASK: u16 = Self::CRC_PRESENT;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_crc(mut self) -> Self {
        self.0 |= Self::CRC_PRESENT;
        self
    }

    pub fn has_crc(&self) -> bool {
        self.0 & Self::CRC_PRESENT != 0
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Result<Self, ProtocolError> {
        if bits & !Self::VALID_MASK != 0 {
            return Err(ProtocolError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u16,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// Creates a checksummed frame around `payload`.
    pub fn new(payload: Bytes) -> Self {
        Self {
            version: crate::PROTOCOL_VERSION,
            flags: FrameFlags::new().with_crc(),
            payload,
        }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload_len = u32::try_from(self.payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_SIZE)
            .ok_or(ProtocolError::FrameTooLarge {
                size: u32::try_from(self.payload.len()).unwrap_or(u32::MAX),
                max: MAX_PAYLOAD_SIZE,
            })?;

        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u16(self.version);
        buf.put_u16(self.flags.bits());
        buf.put_u32(payload_len);

        let crc = if self.flags.has_crc() {
            crc32c::crc32c(&self.payload)
        } else {
            0
        };
        buf.put_u32(crc);
        buf.put_slice(&self.payload);

        Ok(())
    }

    /// Encodes the frame into a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds less than one complete frame.
    /// Header errors are reported as soon as the header is complete.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &buf[..FRAME_HEADER_SIZE];

        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let version = header.get_u16();
        if version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let flags = FrameFlags::from_bits(header.get_u16())?;

        let payload_len = header.get_u32();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let crc_expected = header.get_u32();

        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        if flags.has_crc() {
            let crc_actual = crc32c::crc32c(&payload);
            if crc_actual != crc_expected {
                return Err(ProtocolError::CrcMismatch {
                    expected: crc_expected,
                    actual: crc_actual,
                });
            }
        }

        Ok(Some(Self {
            version,
            flags,
            payload,
        }))
    }
}
