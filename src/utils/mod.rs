//! # Utility Modules
//!
//! Supporting utilities for cryptography, read accounting, logging, and timing.
//!
//! ## Components
//! - **Crypto**: X25519 sealed boxes for handshake payloads
//! - **Throughput**: windowed read accounting behind admission control
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Async timeout wrappers and default durations
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for key material (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod throughput;
pub mod timeout;

pub use crypto::KeyAgent;
pub use throughput::{ReadMeter, SharedMeter};
