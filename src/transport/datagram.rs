//! Connectionless channel.
//!
//! Each datagram carries exactly one command frame, with the same layout as
//! the stream but no retransmission or ordering. The receive buffer is fixed at
//! [`MAX_DATAGRAM_SIZE`]; anything that fills it is assumed truncated by the
//! socket and dropped.
//!
//! Probes carry a one-byte sequence number that advances modulo 256 per probe
//! sent; the peer echoes it back in a `PROBE_REPLY`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::{MAX_DATAGRAM_SIZE, PROBE_BURST};
use crate::core::command::{Command, Opcode};
use crate::error::{ProtocolError, Result};
use crate::protocol::props;
use crate::transport::server::{Inbound, Server};
use crate::utils::metrics::Metrics;

/// Parse one received datagram
pub fn parse_datagram(buf: &[u8]) -> Result<Command> {
    if buf.len() >= MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::OversizedFrame(buf.len()));
    }
    Command::from_bytes(buf)
}

pub fn probe(seq: u8) -> Result<Command> {
    let mut cmd = Command::new(Opcode::Probe);
    cmd.push_u8(props::SEQ, seq)?;
    Ok(cmd)
}

pub fn probe_reply(seq: u8) -> Result<Command> {
    let mut cmd = Command::new(Opcode::ProbeReply);
    cmd.push_u8(props::SEQ, seq)?;
    Ok(cmd)
}

/// Sequence number of a probe or probe reply
pub fn probe_seq(cmd: &Command) -> Option<u8> {
    match cmd.opcode() {
        Opcode::Probe | Opcode::ProbeReply => cmd.get_u8(props::SEQ),
        _ => None,
    }
}

/// The server's UDP endpoint
#[derive(Debug)]
pub struct DatagramChannel {
    socket: UdpSocket,
    probe_seq: AtomicU8,
}

impl DatagramChannel {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            probe_seq: AtomicU8::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one command; the encoded frame must fit the receive buffer
    pub async fn send(&self, addr: SocketAddr, command: &Command) -> Result<()> {
        let frame = command.encode()?;
        if frame.len() >= MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::OversizedFrame(frame.len()));
        }
        self.socket
            .send_to(&frame, addr)
            .await
            .map_err(ProtocolError::transport)?;
        Ok(())
    }

    /// Next probe sequence number, wrapping after 255
    pub fn next_seq(&self) -> u8 {
        self.probe_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Send [`PROBE_BURST`] probes; returns the sequence numbers used
    pub async fn send_probe_burst(&self, addr: SocketAddr, metrics: &Metrics) -> Result<Vec<u8>> {
        let mut sent = Vec::with_capacity(PROBE_BURST);
        for _ in 0..PROBE_BURST {
            let seq = self.next_seq();
            self.send(addr, &probe(seq)?).await?;
            metrics.datagram_sent();
            sent.push(seq);
        }
        debug!(%addr, seqs = ?sent, "Probe burst sent");
        Ok(sent)
    }

    /// Receive until the server shuts down, echoing probes and delivering
    /// every valid command to the callback
    pub(crate) async fn receive_loop(self: Arc<Self>, server: Server) {
        let shutdown = server.shutdown_token();
        let metrics = server.metrics();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };

            let (len, from) = match received {
                Ok(r) => r,
                Err(e) => {
                    // ICMP unreachable surfaces here on some platforms
                    metrics.connection_error();
                    debug!(error = %e, "Datagram receive failed");
                    continue;
                }
            };
            metrics.datagram_received();

            let command = match parse_datagram(&buf[..len]) {
                Ok(command) => command,
                Err(e) => {
                    metrics.datagram_dropped();
                    debug!(%from, len, error = %e, "Dropping datagram");
                    continue;
                }
            };

            if command.opcode() == Opcode::Probe {
                if let Some(seq) = command.get_u8(props::SEQ) {
                    self.echo_probe(from, seq, metrics).await;
                }
            }

            server.deliver(Inbound::Datagram { from, command });
        }
        info!("Datagram channel stopped");
    }

    async fn echo_probe(&self, to: SocketAddr, seq: u8, metrics: &Metrics) {
        let sent = match probe_reply(seq) {
            Ok(reply) => self.send(to, &reply).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => metrics.datagram_sent(),
            Err(e) => warn!(%to, seq, error = %e, "Probe reply failed"),
        }
    }
}
