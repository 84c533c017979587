//! # mmo-protocol
//!
//! Connection management and binary command protocol for a multiplayer game
//! server: long-lived rate-governed sessions, sealed login, broadcast fan-out
//! and a connectionless probe channel.
//!
//! ## Layers
//! - [`core`]: property codec, commands and stream framing
//! - [`protocol`]: account identity, login handshake, opcode dispatch
//! - [`transport`]: sessions, the server and the datagram channel
//! - [`service`]: client connector
//! - [`utils`]: key agent, read accounting, metrics, logging, timeouts
//!
//! ## Example
//! ```no_run
//! use mmo_protocol::config::NetworkConfig;
//! use mmo_protocol::core::command::Opcode;
//! use mmo_protocol::protocol::dispatcher::Dispatcher;
//! use mmo_protocol::transport::{Inbound, Server};
//! use mmo_protocol::utils::crypto::KeyAgent;
//!
//! # async fn run() -> mmo_protocol::error::Result<()> {
//! let server = Server::new(&NetworkConfig::default(), KeyAgent::generate());
//!
//! let dispatcher = Dispatcher::new();
//! dispatcher.register(Opcode::Chat, |server, inbound| {
//!     if let Inbound::Session { handle, command } = inbound {
//!         server.send_others(command, handle)?;
//!     }
//!     Ok(())
//! })?;
//!
//! server.start(dispatcher.into_callback()).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
