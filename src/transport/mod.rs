//! # Transport Layer
//!
//! Sessions over reliable byte streams, the server that owns them, and the
//! connectionless datagram channel.
//!
//! ## Components
//! - **Session**: per-connection state machine, read loop and ordered writer
//! - **Server**: accept loop, session set, broadcast and admission control
//! - **Datagram**: bounded UDP commands and reachability probes
//!
//! ## Resource Limits
//! - Frame bodies capped by `max_frame_size` before allocation
//! - Per-session outbound queues are bounded; a full queue is `Backpressure`
//! - Datagrams of 2048 bytes or more are dropped

pub mod datagram;
pub mod server;
pub mod session;

pub use server::{Inbound, RefreshOutcome, Server, ServerStatus, StopReason};
pub use session::{CloseReason, SessionHandle, SessionId, SessionState};
