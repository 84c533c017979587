//! # Service Layer
//!
//! Client-side connector for game clients and tooling.
//!
//! The server side lives in [`crate::transport::server`]; this module only
//! holds what a remote peer needs: connect, read the server hello, log in and
//! exchange commands with timeouts.

pub mod client;

pub use client::Client;
