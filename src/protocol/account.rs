//! Account identity carried by the LOGIN command.

use crate::core::property::{Property, PropertyValue};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::props;
use crate::utils::crypto::{PublicKeyBytes, KEY_LEN};

pub const MAX_NAME_CHARS: usize = 16;
pub const MAX_TRIP_CHARS: usize = 16;
pub const MAX_MODEL_CHARS: usize = 64;

/// Identity fields supplied by the account collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountIdentity {
    pub name: String,
    /// Tripcode distinguishing accounts with the same name
    pub trip: String,
    /// Reference to the avatar model
    pub model: String,
    /// Port the client listens on for connectionless traffic
    pub udp_port: u16,
    pub public_key: Option<PublicKeyBytes>,
}

impl AccountIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_trip(mut self, trip: impl Into<String>) -> Self {
        self.trip = trip.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    pub fn with_public_key(mut self, key: PublicKeyBytes) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Encode as properties. Empty trip and model are left out; an
    /// over-long field fails with `PropertyTooLong`.
    pub fn to_properties(&self) -> Result<Vec<Property>> {
        if self.name.is_empty() {
            return Err(ProtocolError::HandshakeError(constants::ERR_MISSING_NAME.into()));
        }

        let mut out = vec![Property::bounded_str(props::NAME, &self.name, MAX_NAME_CHARS)?];
        if !self.trip.is_empty() {
            out.push(Property::bounded_str(props::TRIP, &self.trip, MAX_TRIP_CHARS)?);
        }
        if !self.model.is_empty() {
            out.push(Property::bounded_str(props::MODEL, &self.model, MAX_MODEL_CHARS)?);
        }
        out.push(Property::new(props::UDP_PORT, PropertyValue::U16(self.udp_port)));
        if let Some(key) = self.public_key {
            out.push(Property::new(props::PUBLIC_KEY, PropertyValue::Bytes(key.to_vec())));
        }
        Ok(out)
    }

    /// Rebuild from decoded properties, re-checking every bound
    pub fn from_properties(properties: &[Property]) -> Result<Self> {
        let find = |id: u16| properties.iter().find(|p| p.id == id).map(|p| &p.value);

        let name = bounded(find(props::NAME), props::NAME, MAX_NAME_CHARS)?
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_MISSING_NAME.into()))?;
        if name.is_empty() {
            return Err(ProtocolError::HandshakeError(constants::ERR_MISSING_NAME.into()));
        }
        let trip = bounded(find(props::TRIP), props::TRIP, MAX_TRIP_CHARS)?.unwrap_or_default();
        let model = bounded(find(props::MODEL), props::MODEL, MAX_MODEL_CHARS)?.unwrap_or_default();
        let udp_port = find(props::UDP_PORT).and_then(PropertyValue::as_u16).unwrap_or(0);

        let public_key = match find(props::PUBLIC_KEY).and_then(PropertyValue::as_bytes) {
            Some(raw) => Some(
                <[u8; KEY_LEN]>::try_from(raw)
                    .map_err(|_| ProtocolError::HandshakeError(constants::ERR_BAD_KEY_LENGTH.into()))?,
            ),
            None => None,
        };

        Ok(Self {
            name,
            trip,
            model,
            udp_port,
            public_key,
        })
    }
}

fn bounded(value: Option<&PropertyValue>, id: u16, max: usize) -> Result<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let s = value
        .as_str()
        .ok_or_else(|| ProtocolError::MalformedProperty(format!("property {id} is not a string")))?;
    let len = s.chars().count();
    if len > max {
        return Err(ProtocolError::PropertyTooLong { id, len, max });
    }
    Ok(Some(s.to_owned()))
}
