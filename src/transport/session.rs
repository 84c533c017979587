//! # Sessions
//!
//! One reliable, ordered connection to a single peer.
//!
//! ## State Machine
//! ```text
//! Connecting -> Active -> Draining -> Closed
//! ```
//! `Draining` refuses new sends while the writer flushes what is already
//! queued. `Closed` is terminal; the server prunes it from its set.
//!
//! Each session runs two tasks. The read task meters every byte, splits the
//! stream into frames, handles LOGIN and hands commands to the server callback
//! in arrival order. The write task drains a bounded queue of pre-encoded
//! frames in submission order.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::CommandCodec;
use crate::core::command::Opcode;
use crate::error::{ProtocolError, Result};
use crate::protocol::account::AccountIdentity;
use crate::protocol::handshake;
use crate::transport::server::{Inbound, Server};
use crate::utils::throughput::{MeteredRead, RollOutcome, SharedMeter};

/// Opaque connection id, never reused within one server
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session left the Active state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed through the server API
    Local,
    PeerClosed,
    Transport,
    ProtocolViolation,
    UnknownOpcodes,
    HandshakeFailed,
    Flooding,
    Idle,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Local => "local",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Transport => "transport_error",
            CloseReason::ProtocolViolation => "protocol_violation",
            CloseReason::UnknownOpcodes => "unknown_opcodes",
            CloseReason::HandshakeFailed => "handshake_failed",
            CloseReason::Flooding => "flooding",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Non-owning reference to a session.
///
/// Every operation through a handle is a lookup by id in the server's set, so
/// a handle to a closed session simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.id, self.peer)
    }
}

/// Per-session tolerances copied from the server config
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionLimits {
    pub max_frame_size: usize,
    pub max_protocol_violations: u32,
    pub max_unknown_opcodes: u32,
    pub require_sealed_login: bool,
}

/// Server-side state of one connection
#[derive(Debug)]
pub(crate) struct Session {
    handle: SessionHandle,
    state: AtomicU8,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    meter: Arc<SharedMeter>,
    account: Mutex<Option<AccountIdentity>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
        meter: Arc<SharedMeter>,
    ) -> Self {
        Self {
            handle: SessionHandle { id, peer },
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbound,
            cancel,
            meter,
            account: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Move `from` to `to` if the session is still in `from`
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn activate(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Active)
    }

    /// Enqueue a pre-encoded frame.
    ///
    /// Fails with `SessionUnavailable` unless Active and with `Backpressure`
    /// when the outbound queue is full.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_active() {
            return Err(ProtocolError::SessionUnavailable(self.id()));
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::Backpressure(self.id()),
            mpsc::error::TrySendError::Closed(_) => ProtocolError::SessionUnavailable(self.id()),
        })
    }

    /// Begin closing: Active or Connecting become Draining and both tasks are
    /// cancelled. Returns false if the session was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        let closing = self.transition(SessionState::Active, SessionState::Draining)
            || self.transition(SessionState::Connecting, SessionState::Draining);
        if closing {
            info!(session = %self.handle, %reason, "Session draining");
        }
        self.cancel.cancel();
        closing
    }

    fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Fold completed accounting windows
    pub fn roll(&self, now: Instant, floor: u64) -> RollOutcome {
        self.meter.roll(now, floor)
    }

    pub fn read_average(&self) -> u64 {
        self.meter.average()
    }

    pub fn bytes_read(&self) -> u64 {
        self.meter.total()
    }

    pub fn account(&self) -> Option<AccountIdentity> {
        self.account.lock().ok().and_then(|a| a.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    fn bind_account(&self, identity: AccountIdentity) {
        if let Ok(mut slot) = self.account.lock() {
            *slot = Some(identity);
        }
    }
}

/// Start the read and write tasks for an accepted stream
pub(crate) fn spawn<S>(
    stream: S,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Bytes>,
    server: Server,
    limits: SessionLimits,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let closed = server.closed_notifier();

    tokio::spawn(write_loop(writer, outbound, session.clone(), closed));
    tokio::spawn(read_loop(reader, session, server, limits));
}

#[instrument(skip_all, fields(session = %session.handle))]
async fn write_loop<S>(
    writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<Bytes>,
    session: Arc<Session>,
    closed: mpsc::UnboundedSender<SessionId>,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    let mut sink = FramedWrite::new(writer, BytesCodec::new());
    let mut healthy = true;

    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "Write failed");
                        session.close(CloseReason::Transport);
                        healthy = false;
                        break;
                    }
                }
                None => break,
            },
            _ = session.cancel.cancelled() => break,
        }
    }

    // Draining: flush what was queued before the close, then shut down
    outbound.close();
    if healthy {
        while let Ok(frame) = outbound.try_recv() {
            if sink.feed(frame).await.is_err() {
                break;
            }
        }
        if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
            debug!(error = %e, "Shutdown after drain failed");
        }
    }

    session.mark_closed();
    debug!("Session closed");
    let _ = closed.send(session.id());
}

#[instrument(skip_all, fields(session = %session.handle))]
async fn read_loop<S>(
    reader: ReadHalf<S>,
    session: Arc<Session>,
    server: Server,
    limits: SessionLimits,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    let metered = MeteredRead::new(reader, session.meter.clone());
    let mut frames = FramedRead::new(metered, CommandCodec::new(limits.max_frame_size));
    let metrics = server.metrics();
    let mut violations = 0u32;
    let mut unknown = 0u32;

    loop {
        let next = tokio::select! {
            _ = session.cancel.cancelled() => break,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            None => {
                debug!("Peer closed the stream");
                session.close(CloseReason::PeerClosed);
                break;
            }
            Some(Err(ProtocolError::Io(e))) => {
                metrics.connection_error();
                warn!(error = %e, "Transport error");
                session.close(CloseReason::Transport);
                break;
            }
            Some(Err(e)) => {
                // framing lost: oversized length prefix or EOF inside a frame
                metrics.protocol_error();
                warn!(error = %e, "Stream framing violated");
                session.close(CloseReason::ProtocolViolation);
                break;
            }
        };

        metrics.command_received(frame.wire_len() as u64);

        let command = match frame.parse() {
            Ok(command) => command,
            Err(ProtocolError::UnknownOpcode(op)) => {
                unknown += 1;
                metrics.unknown_opcode();
                debug!(opcode = op, count = unknown, "Dropping frame with unknown opcode");
                if unknown > limits.max_unknown_opcodes {
                    warn!(count = unknown, "Unknown opcode tolerance exceeded");
                    session.close(CloseReason::UnknownOpcodes);
                    break;
                }
                continue;
            }
            Err(e) => {
                violations += 1;
                metrics.protocol_error();
                debug!(error = %e, count = violations, "Dropping malformed frame");
                if violations > limits.max_protocol_violations {
                    warn!(count = violations, "Protocol violation tolerance exceeded");
                    session.close(CloseReason::ProtocolViolation);
                    break;
                }
                continue;
            }
        };

        let command = if command.opcode() == Opcode::Login {
            metrics.handshake_attempt();
            let opened = handshake::open_login(server.key_agent(), &command, limits.require_sealed_login)
                .and_then(|identity| handshake::plain_login(&identity).map(|plain| (identity, plain)));
            match opened {
                Ok((identity, plain)) => {
                    metrics.handshake_success();
                    info!(name = %identity.name, udp_port = identity.udp_port, "Login accepted");
                    session.bind_account(identity);
                    plain
                }
                Err(e) => {
                    metrics.handshake_failed();
                    warn!(error = %e, "Login rejected");
                    session.close(CloseReason::HandshakeFailed);
                    break;
                }
            }
        } else {
            command
        };

        server.deliver(Inbound::Session {
            handle: session.handle,
            command,
        });
    }
}
