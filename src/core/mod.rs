//! # Core Protocol Components
//!
//! Property encoding, command framing and the stream codec.
//!
//! ## Components
//! - **Property**: typed, bounded key-value units
//! - **Command**: opcode plus uniquely keyed properties
//! - **Codec**: Tokio codec splitting a byte stream into frames
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [Opcode(2)] ([PropertyId(2)] [Kind(1)] [Length(2)] [Value])*
//! ```
//!
//! ## Security
//! - Frame bodies are capped (64 KiB by default) before any allocation
//! - Declared property lengths are checked against the remaining buffer
//! - Over-long strings are rejected, never truncated

pub mod codec;
pub mod command;
pub mod property;
