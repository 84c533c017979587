//! # Commands
//!
//! A command is an opcode plus an ordered list of uniquely keyed properties.
//! It is the unit of application-level communication on both the reliable
//! stream and the connectionless channel.
//!
//! ## Frame Format
//! ```text
//! [Length(4)] [Opcode(2)] [Property]*
//! ```
//! `Length` counts the bytes after itself (opcode and properties).

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::property::{self, Property, PropertyId, PropertyValue, MAX_VALUE_LEN};
use crate::error::{ProtocolError, Result};

/// Size of the length prefix in front of every frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Size of the opcode field
pub const OPCODE_LEN: usize = 2;

/// Message kinds understood by this protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Server to client on connect: carries the server public key
    ServerHello = 0x0001,
    /// Client login, sealed or plain account identity
    Login = 0x0010,
    LoginAccepted = 0x0011,
    LoginRejected = 0x0012,
    Logout = 0x0013,
    Chat = 0x0020,
    PlayerUpdate = 0x0030,
    Heartbeat = 0x0040,
    /// Connectionless reachability probe
    Probe = 0x0050,
    /// Echo of a probe, same sequence number
    ProbeReply = 0x0051,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        let op = match value {
            0x0001 => Opcode::ServerHello,
            0x0010 => Opcode::Login,
            0x0011 => Opcode::LoginAccepted,
            0x0012 => Opcode::LoginRejected,
            0x0013 => Opcode::Logout,
            0x0020 => Opcode::Chat,
            0x0030 => Opcode::PlayerUpdate,
            0x0040 => Opcode::Heartbeat,
            0x0050 => Opcode::Probe,
            0x0051 => Opcode::ProbeReply,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Human-readable name, used in logs and dispatch tables
    pub fn name(self) -> &'static str {
        match self {
            Opcode::ServerHello => "SERVER_HELLO",
            Opcode::Login => "LOGIN",
            Opcode::LoginAccepted => "LOGIN_ACCEPTED",
            Opcode::LoginRejected => "LOGIN_REJECTED",
            Opcode::Logout => "LOGOUT",
            Opcode::Chat => "CHAT",
            Opcode::PlayerUpdate => "PLAYER_UPDATE",
            Opcode::Heartbeat => "HEARTBEAT",
            Opcode::Probe => "PROBE",
            Opcode::ProbeReply => "PROBE_REPLY",
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        Opcode::from_u16(value).ok_or(ProtocolError::UnknownOpcode(value))
    }
}

/// An application-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    properties: Vec<Property>,
}

impl Command {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            properties: Vec::new(),
        }
    }

    /// Build a command from already-typed properties, enforcing unique ids
    pub fn from_parts(opcode: Opcode, properties: Vec<Property>) -> Result<Self> {
        let mut cmd = Self::new(opcode);
        for p in properties {
            cmd.push(p.id, p.value)?;
        }
        Ok(cmd)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn into_properties(self) -> Vec<Property> {
        self.properties
    }

    /// Append a property. Ids must be unique within one command.
    pub fn push(&mut self, id: PropertyId, value: PropertyValue) -> Result<&mut Self> {
        if self.properties.iter().any(|p| p.id == id) {
            return Err(ProtocolError::DuplicateProperty(id));
        }
        let len = value.value_len();
        if len > MAX_VALUE_LEN {
            return Err(ProtocolError::PropertyTooLong {
                id,
                len,
                max: MAX_VALUE_LEN,
            });
        }
        self.properties.push(Property::new(id, value));
        Ok(self)
    }

    /// Append a string property bounded to `max_chars` characters
    pub fn push_str(&mut self, id: PropertyId, value: &str, max_chars: usize) -> Result<&mut Self> {
        let prop = Property::bounded_str(id, value, max_chars)?;
        self.push(prop.id, prop.value)
    }

    pub fn push_u8(&mut self, id: PropertyId, value: u8) -> Result<&mut Self> {
        self.push(id, PropertyValue::U8(value))
    }

    pub fn push_u16(&mut self, id: PropertyId, value: u16) -> Result<&mut Self> {
        self.push(id, PropertyValue::U16(value))
    }

    pub fn push_u32(&mut self, id: PropertyId, value: u32) -> Result<&mut Self> {
        self.push(id, PropertyValue::U32(value))
    }

    pub fn push_bytes(&mut self, id: PropertyId, value: Vec<u8>) -> Result<&mut Self> {
        self.push(id, PropertyValue::Bytes(value))
    }

    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.id == id)
            .map(|p| &p.value)
    }

    pub fn get_str(&self, id: PropertyId) -> Option<&str> {
        self.get(id).and_then(PropertyValue::as_str)
    }

    pub fn get_u8(&self, id: PropertyId) -> Option<u8> {
        self.get(id).and_then(PropertyValue::as_u8)
    }

    pub fn get_u16(&self, id: PropertyId) -> Option<u16> {
        self.get(id).and_then(PropertyValue::as_u16)
    }

    pub fn get_bytes(&self, id: PropertyId) -> Option<&[u8]> {
        self.get(id).and_then(PropertyValue::as_bytes)
    }

    /// Bytes after the length prefix
    pub fn body_len(&self) -> usize {
        OPCODE_LEN
            + self
                .properties
                .iter()
                .map(|p| p.value.encoded_len())
                .sum::<usize>()
    }

    /// Full on-wire size including the length prefix
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body_len()
    }

    /// Serialize into a length-prefixed frame
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the length-prefixed frame to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        let body_len = self.body_len();
        let body_len = u32::try_from(body_len).map_err(|_| ProtocolError::OversizedFrame(body_len))?;

        dst.reserve(FRAME_HEADER_LEN + body_len as usize);
        dst.put_u32(body_len);
        dst.put_u16(self.opcode.as_u16());
        for p in &self.properties {
            property::encode_into(p.id, &p.value, dst)?;
        }
        Ok(())
    }

    /// Parse one complete frame occupying the whole buffer.
    ///
    /// The declared length must match the bytes present exactly.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::TruncatedFrame {
                declared: FRAME_HEADER_LEN,
                available: buf.len(),
            });
        }

        let (header, body) = buf.split_at(FRAME_HEADER_LEN);
        let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if declared != body.len() {
            return Err(ProtocolError::TruncatedFrame {
                declared,
                available: body.len(),
            });
        }

        Self::from_body(body)
    }

    /// Parse the part of a frame after the length prefix
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.len() < OPCODE_LEN {
            return Err(ProtocolError::TruncatedFrame {
                declared: OPCODE_LEN,
                available: body.len(),
            });
        }

        let (op, rest) = body.split_at(OPCODE_LEN);
        let opcode = Opcode::try_from(u16::from_be_bytes([op[0], op[1]]))?;
        let properties = property::decode(rest)?;

        Self::from_parts(opcode, properties).map_err(|e| match e {
            ProtocolError::DuplicateProperty(id) => {
                ProtocolError::MalformedProperty(format!("duplicate property id {id}"))
            }
            other => other,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn login(name: &str) -> Command {
        let mut cmd = Command::new(Opcode::Login);
        cmd.push_str(1, name, 16).unwrap().push_u16(4, 39391).unwrap();
        cmd
    }

    #[test]
    fn test_frame_roundtrip() {
        let cmd = login("alice");
        let bytes = cmd.encode().unwrap();
        assert_eq!(bytes.len(), cmd.frame_len());
        assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_frame_header_layout() {
        let bytes = Command::new(Opcode::Heartbeat).encode().unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 2, 0x00, 0x40]);
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = login("alice").encode().unwrap();
        let err = Command::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedFrame { .. }));

        let mut longer = bytes.to_vec();
        longer.push(0);
        assert!(matches!(
            Command::from_bytes(&longer),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let bytes = [0, 0, 0, 2, 0x7F, 0x7F];
        assert!(matches!(
            Command::from_bytes(&bytes),
            Err(ProtocolError::UnknownOpcode(0x7F7F))
        ));
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let mut cmd = Command::new(Opcode::Chat);
        cmd.push_u8(1, 1).unwrap();
        assert!(matches!(
            cmd.push_u8(1, 2),
            Err(ProtocolError::DuplicateProperty(1))
        ));
    }

    #[test]
    fn test_duplicate_property_on_wire_is_malformed() {
        let mut body = vec![0x00, 0x20];
        property::encode_into(1, &PropertyValue::U8(1), &mut body).unwrap();
        property::encode_into(1, &PropertyValue::U8(2), &mut body).unwrap();
        assert!(matches!(
            Command::from_body(&body),
            Err(ProtocolError::MalformedProperty(_))
        ));
    }

    #[test]
    fn test_over_long_string_rejected_not_truncated() {
        let mut cmd = Command::new(Opcode::Login);
        let err = cmd.push_str(1, "seventeen-chars!!", 16).unwrap_err();
        assert!(matches!(err, ProtocolError::PropertyTooLong { len: 17, max: 16, .. }));
        assert!(cmd.properties().is_empty());
    }

    #[test]
    fn test_opcode_table_is_consistent() {
        for op in [
            Opcode::ServerHello,
            Opcode::Login,
            Opcode::LoginAccepted,
            Opcode::LoginRejected,
            Opcode::Logout,
            Opcode::Chat,
            Opcode::PlayerUpdate,
            Opcode::Heartbeat,
            Opcode::Probe,
            Opcode::ProbeReply,
        ] {
            assert_eq!(Opcode::from_u16(op.as_u16()), Some(op));
        }
    }
}
