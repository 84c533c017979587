//! Login handshake built on the asymmetric key agent.
//!
//! The server announces its long-lived public key in `SERVER_HELLO`. The client
//! encodes its [`AccountIdentity`] with the property codec and seals the bytes
//! to that key, so name, trip and model reference never cross the wire in the
//! clear. There is no session key and no forward secrecy; see
//! [`crate::utils::crypto`].

use bytes::BytesMut;
use tracing::{debug, instrument};

use crate::core::command::{Command, Opcode};
use crate::core::property;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::account::AccountIdentity;
use crate::protocol::props;
use crate::utils::crypto::{KeyAgent, PublicKeyBytes, KEY_LEN};

/// Build the hello carrying the server public key
pub fn server_hello(agent: &KeyAgent) -> Result<Command> {
    let mut cmd = Command::new(Opcode::ServerHello);
    cmd.push_bytes(props::SERVER_KEY, agent.public_key().to_vec())?;
    Ok(cmd)
}

/// Extract the server public key from a hello
pub fn parse_server_hello(cmd: &Command) -> Result<PublicKeyBytes> {
    if cmd.opcode() != Opcode::ServerHello {
        return Err(ProtocolError::HandshakeError(format!(
            "expected SERVER_HELLO, got {}",
            cmd.opcode().name()
        )));
    }
    let raw = cmd
        .get_bytes(props::SERVER_KEY)
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_MISSING_SERVER_KEY.into()))?;
    <[u8; KEY_LEN]>::try_from(raw)
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_BAD_KEY_LENGTH.into()))
}

/// LOGIN with the identity sealed to `server_key`
#[instrument(skip_all, fields(name = %identity.name))]
pub fn seal_login(server_key: &PublicKeyBytes, identity: &AccountIdentity) -> Result<Command> {
    let mut plain = BytesMut::new();
    for p in identity.to_properties()? {
        property::encode_into(p.id, &p.value, &mut plain)?;
    }

    let sealed = KeyAgent::encrypt(server_key, &plain)?;
    debug!(sealed_len = sealed.len(), "Sealed login payload");

    let mut cmd = Command::new(Opcode::Login);
    cmd.push_bytes(props::SEALED, sealed)?;
    Ok(cmd)
}

/// LOGIN with the identity as plain properties
pub fn plain_login(identity: &AccountIdentity) -> Result<Command> {
    Command::from_parts(Opcode::Login, identity.to_properties()?)
}

/// Recover the identity from a received LOGIN.
///
/// A sealed payload that cannot be opened with `agent` yields
/// `DecryptionFailed`. With `require_sealed`, a plain LOGIN is refused.
pub fn open_login(agent: &KeyAgent, cmd: &Command, require_sealed: bool) -> Result<AccountIdentity> {
    if cmd.opcode() != Opcode::Login {
        return Err(ProtocolError::HandshakeError(format!(
            "expected LOGIN, got {}",
            cmd.opcode().name()
        )));
    }

    match cmd.get_bytes(props::SEALED) {
        Some(sealed) => {
            let plain = agent.decrypt(sealed)?;
            // same uniqueness rule as properties sent in the clear
            let fields = Command::from_parts(Opcode::Login, property::decode(&plain)?)?;
            AccountIdentity::from_properties(fields.properties())
        }
        None if require_sealed => {
            Err(ProtocolError::HandshakeError(constants::ERR_UNSEALED_LOGIN.into()))
        }
        None => AccountIdentity::from_properties(cmd.properties()),
    }
}

pub fn login_accepted() -> Command {
    Command::new(Opcode::LoginAccepted)
}

/// Rejection with a short reason for the client
pub fn login_rejected(reason: &str) -> Result<Command> {
    let mut cmd = Command::new(Opcode::LoginRejected);
    cmd.push_str(props::REASON, reason, 64)?;
    Ok(cmd)
}
