//! # Error Types
//!
//! Error handling for the session and command protocol.
//!
//! This module defines every error variant that can occur while framing commands,
//! running sessions, opening sealed handshake payloads and enforcing admission limits.
//!
//! ## Error Categories
//! - **Transport Errors**: socket failures; the session is closed, never retried here
//! - **Protocol Violations**: malformed properties, truncated frames, over-long values
//! - **Forward Compatibility**: unknown opcodes are dropped, not fatal
//! - **Cryptographic Errors**: sealed payloads that fail to open
//! - **Admission Errors**: throughput limits exceeded
//!
//! Per-session errors only ever close that session. Only failures to bind the
//! listening endpoints at startup are surfaced to the operator as fatal.
//!
//! ## Example Usage
//! ```rust
//! use mmo_protocol::core::command::{Command, Opcode};
//! use mmo_protocol::error::ProtocolError;
//!
//! let mut cmd = Command::new(Opcode::Chat);
//! match cmd.push_str(1, "this message is far too long", 16) {
//!     Err(ProtocolError::PropertyTooLong { id, len, max }) => {
//!         assert_eq!((id, max), (1, 16));
//!         assert!(len > max);
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Synchronisation errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Cryptographic errors
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source unavailable";
    pub const ERR_SEALED_TOO_SHORT: &str = "Sealed payload shorter than its envelope";

    /// Handshake errors
    pub const ERR_MISSING_NAME: &str = "Login carries no account name";
    pub const ERR_UNSEALED_LOGIN: &str = "Unsealed login rejected by policy";
    pub const ERR_MISSING_SERVER_KEY: &str = "Server hello carries no public key";
    pub const ERR_BAD_KEY_LENGTH: &str = "Public key must be 32 bytes";

    /// Admission errors
    pub const ERR_SESSION_FLOODING: &str = "Session read average above limit";
    pub const ERR_SESSION_IDLE: &str = "Session read average below minimum for too long";
    pub const ERR_SERVER_FULL: &str = "Maximum number of connections reached";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed property: {0}")]
    MalformedProperty(String),

    #[error("Truncated frame: declared {declared} bytes, {available} available")]
    TruncatedFrame { declared: usize, available: usize },

    #[error("Property {id} too long: {len} > {max}")]
    PropertyTooLong { id: u16, len: usize, max: usize },

    #[error("Duplicate property id {0}")]
    DuplicateProperty(u16),

    #[error("Unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Session {0} unavailable")]
    SessionUnavailable(u64),

    #[error("Outbound queue full for session {0}")]
    Backpressure(u64),

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server not started")]
    NotStarted,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error is a protocol violation counted against a session's tolerance.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedProperty(_)
                | ProtocolError::TruncatedFrame { .. }
                | ProtocolError::PropertyTooLong { .. }
                | ProtocolError::DuplicateProperty(_)
        )
    }

    /// A socket-level failure, with the I/O error kept as text
    pub fn transport(err: io::Error) -> Self {
        ProtocolError::TransportError(format!("{:?}: {err}", err.kind()))
    }

    /// Reclassify `Io` raised by a socket as `TransportError`
    pub fn into_transport(self) -> Self {
        match self {
            ProtocolError::Io(err) => ProtocolError::transport(err),
            other => other,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
