//! # Property Codec
//!
//! Typed key-value units carried inside a [`Command`](crate::core::command::Command).
//!
//! ## Wire Format
//! ```text
//! [PropertyId(2)] [Kind(1)] [Length(2)] [Value(Length)]
//! ```
//! All integers are big-endian. Numeric kinds have a fixed width and the
//! declared length must match it exactly; string and byte kinds carry any
//! length up to [`MAX_VALUE_LEN`].
//!
//! Decoding never trusts the declared length: a length that runs past the end
//! of the buffer is a [`ProtocolError::MalformedProperty`], which callers treat
//! as a protocol violation.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};

/// Identifier of a property inside one command
pub type PropertyId = u16;

/// Size of the per-property header: id, kind, length
pub const PROPERTY_HEADER_LEN: usize = 5;

/// Largest value a single property may carry
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

const KIND_U8: u8 = 0x01;
const KIND_U16: u8 = 0x02;
const KIND_U32: u8 = 0x03;
const KIND_U64: u8 = 0x04;
const KIND_I32: u8 = 0x05;
const KIND_STR: u8 = 0x10;
const KIND_BYTES: u8 = 0x11;

/// A typed property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    Str(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Wire tag for this value's type
    pub fn kind(&self) -> u8 {
        match self {
            PropertyValue::U8(_) => KIND_U8,
            PropertyValue::U16(_) => KIND_U16,
            PropertyValue::U32(_) => KIND_U32,
            PropertyValue::U64(_) => KIND_U64,
            PropertyValue::I32(_) => KIND_I32,
            PropertyValue::Str(_) => KIND_STR,
            PropertyValue::Bytes(_) => KIND_BYTES,
        }
    }

    /// Length of the value part on the wire
    pub fn value_len(&self) -> usize {
        match self {
            PropertyValue::U8(_) => 1,
            PropertyValue::U16(_) => 2,
            PropertyValue::U32(_) | PropertyValue::I32(_) => 4,
            PropertyValue::U64(_) => 8,
            PropertyValue::Str(s) => s.len(),
            PropertyValue::Bytes(b) => b.len(),
        }
    }

    /// Total encoded size including the property header
    pub fn encoded_len(&self) -> usize {
        PROPERTY_HEADER_LEN + self.value_len()
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            PropertyValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            PropertyValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One (id, value) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: PropertyId,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(id: PropertyId, value: PropertyValue) -> Self {
        Self { id, value }
    }

    /// Build a string property, rejecting values longer than `max_chars`.
    ///
    /// Values are never truncated: a silently shortened string would leave the
    /// peer decoding a different value than the sender intended.
    pub fn bounded_str(id: PropertyId, value: &str, max_chars: usize) -> Result<Self> {
        let len = value.chars().count();
        if len > max_chars || value.len() > MAX_VALUE_LEN {
            return Err(ProtocolError::PropertyTooLong {
                id,
                len,
                max: max_chars,
            });
        }
        Ok(Self::new(id, PropertyValue::Str(value.to_owned())))
    }
}

/// Encode a single property into a fresh buffer
pub fn encode(id: PropertyId, value: &PropertyValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(value.encoded_len());
    encode_into(id, value, &mut out)?;
    Ok(out)
}

/// Append a single encoded property to `out`
pub fn encode_into<B: BufMut>(id: PropertyId, value: &PropertyValue, out: &mut B) -> Result<()> {
    let len = value.value_len();
    if len > MAX_VALUE_LEN {
        return Err(ProtocolError::PropertyTooLong {
            id,
            len,
            max: MAX_VALUE_LEN,
        });
    }

    out.put_u16(id);
    out.put_u8(value.kind());
    out.put_u16(len as u16);
    match value {
        PropertyValue::U8(v) => out.put_u8(*v),
        PropertyValue::U16(v) => out.put_u16(*v),
        PropertyValue::U32(v) => out.put_u32(*v),
        PropertyValue::U64(v) => out.put_u64(*v),
        PropertyValue::I32(v) => out.put_i32(*v),
        PropertyValue::Str(s) => out.put_slice(s.as_bytes()),
        PropertyValue::Bytes(b) => out.put_slice(b),
    }
    Ok(())
}

/// Decode a flat sequence of properties.
///
/// The whole buffer must consist of complete properties; any trailing partial
/// unit is malformed.
pub fn decode(mut buf: &[u8]) -> Result<Vec<Property>> {
    let mut properties = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < PROPERTY_HEADER_LEN {
            return Err(ProtocolError::MalformedProperty(format!(
                "incomplete header: {} bytes",
                buf.remaining()
            )));
        }

        let id = buf.get_u16();
        let kind = buf.get_u8();
        let len = buf.get_u16() as usize;

        if len > buf.remaining() {
            return Err(ProtocolError::MalformedProperty(format!(
                "property {id} declares {len} bytes, {} remain",
                buf.remaining()
            )));
        }

        let (raw, rest) = buf.split_at(len);
        properties.push(Property::new(id, decode_value(id, kind, raw)?));
        buf = rest;
    }

    Ok(properties)
}

fn check_width(id: PropertyId, kind: u8, len: usize, width: usize) -> Result<()> {
    if len == width {
        Ok(())
    } else {
        Err(ProtocolError::MalformedProperty(format!(
            "property {id} kind {kind:#04x} expects {width} bytes, got {len}"
        )))
    }
}

fn decode_value(id: PropertyId, kind: u8, mut raw: &[u8]) -> Result<PropertyValue> {
    let len = raw.len();
    let expect_width = move |width: usize| check_width(id, kind, len, width);

    let value = match kind {
        KIND_U8 => {
            expect_width(1)?;
            PropertyValue::U8(raw.get_u8())
        }
        KIND_U16 => {
            expect_width(2)?;
            PropertyValue::U16(raw.get_u16())
        }
        KIND_U32 => {
            expect_width(4)?;
            PropertyValue::U32(raw.get_u32())
        }
        KIND_U64 => {
            expect_width(8)?;
            PropertyValue::U64(raw.get_u64())
        }
        KIND_I32 => {
            expect_width(4)?;
            PropertyValue::I32(raw.get_i32())
        }
        KIND_STR => {
            let s = std::str::from_utf8(raw).map_err(|e| {
                ProtocolError::MalformedProperty(format!("property {id} is not UTF-8: {e}"))
            })?;
            PropertyValue::Str(s.to_owned())
        }
        KIND_BYTES => PropertyValue::Bytes(raw.to_vec()),
        other => {
            return Err(ProtocolError::MalformedProperty(format!(
                "property {id} has unknown kind {other:#04x}"
            )))
        }
    };
    Ok(value)
}
