//! # Protocol Layer
//!
//! Account identity, the login handshake and opcode dispatch.
//!
//! ## Components
//! - **Account**: bounded identity fields carried by LOGIN
//! - **Handshake**: server hello plus sealed or plain LOGIN
//! - **Dispatcher**: opcode-based routing usable as the server callback
//!
//! ## Handshake Flow
//! 1. Server sends `SERVER_HELLO` with its X25519 public key as soon as a session is active
//! 2. Client seals its identity to that key and sends `LOGIN`
//! 3. Server opens the payload and binds the identity to the session
//!
//! A payload that fails to open closes the session; nothing is bound.

pub mod account;
pub mod dispatcher;
pub mod handshake;


/// Property ids shared by the built-in opcodes
pub mod props {
    use crate::core::property::PropertyId;

    pub const NAME: PropertyId = 0x0001;
    pub const TRIP: PropertyId = 0x0002;
    pub const MODEL: PropertyId = 0x0003;
    pub const UDP_PORT: PropertyId = 0x0004;
    pub const PUBLIC_KEY: PropertyId = 0x0005;

    /// Sealed identity payload inside LOGIN
    pub const SEALED: PropertyId = 0x0010;
    /// Server public key inside SERVER_HELLO
    pub const SERVER_KEY: PropertyId = 0x0011;

    /// Probe sequence number
    pub const SEQ: PropertyId = 0x0020;

    pub const MESSAGE: PropertyId = 0x0030;
    pub const REASON: PropertyId = 0x0031;
}
