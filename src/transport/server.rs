//! # Server
//!
//! Owns the listening endpoints, the live session set and server-wide
//! throughput accounting.
//!
//! ## Concurrency
//! The session set is the only structure shared between the accept loop, the
//! session tasks and administrative calls. Every mutation and iteration takes
//! its lock; sends under the lock never block because they only `try_send` into
//! bounded per-session queues.
//!
//! ## Admission Control
//! [`Server::refresh_session`] runs once per accounting window from a
//! maintenance task and may also be called directly. Each pass:
//! 1. rolls every Active session's meter and closes sessions whose average is
//!    above the per-session maximum (flooding)
//! 2. closes sessions that stayed under the per-session minimum for the idle
//!    timeout (stale)
//! 3. pauses new accepts while the sum of averages is above the server-wide
//!    maximum; established sessions keep reading
//! 4. prunes Closed sessions
//!
//! ## Delivery
//! The callback runs inline on each session's read task, so commands from one
//! session arrive in order; callbacks for different sessions may run
//! concurrently. A command being dispatched when [`Server::stop`] is called
//! may or may not finish processing.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{AdmissionConfig, NetworkConfig, ServerConfig};
use crate::core::command::{Command, Opcode};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::account::AccountIdentity;
use crate::protocol::handshake;
use crate::transport::datagram::DatagramChannel;
use crate::transport::session::{
    self, CloseReason, Session, SessionHandle, SessionId, SessionLimits, SessionState,
};
use crate::utils::crypto::KeyAgent;
use crate::utils::metrics::{Metrics, MetricsSnapshot};
use crate::utils::throughput::{ReadMeter, SharedMeter};
use crate::utils::timeout::with_timeout_error;

/// A command delivered to application logic
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Decoded from a session's stream
    Session {
        handle: SessionHandle,
        command: Command,
    },
    /// Received on the connectionless channel
    Datagram { from: SocketAddr, command: Command },
}

impl Inbound {
    pub fn command(&self) -> &Command {
        match self {
            Inbound::Session { command, .. } | Inbound::Datagram { command, .. } => command,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.command().opcode()
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        match self {
            Inbound::Session { handle, .. } => Some(handle),
            Inbound::Datagram { .. } => None,
        }
    }
}

/// Application callback: `OnCommand(server, inbound)`
pub type Callback = dyn Fn(&Server, Inbound) + Send + Sync + 'static;

/// Why the server is stopping, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Administrative,
    /// Operator interrupt (Ctrl-C, SIGTERM)
    Interrupted,
    Fault,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Administrative => "administrative",
            StopReason::Interrupted => "interrupted",
            StopReason::Fault => "fault",
        })
    }
}

/// What one admission-control pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    /// Closed sessions removed from the set
    pub pruned: usize,
    /// Sessions closed for reading above the per-session maximum
    pub flooding: usize,
    /// Sessions closed for staying under the per-session minimum
    pub idle: usize,
    /// Sum of the remaining Active sessions' averages
    pub aggregate_read_average: u64,
    pub admission_paused: bool,
}

/// Monitoring snapshot returned by [`Server::get_status_json`]
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub address: Option<SocketAddr>,
    pub udp_address: Option<SocketAddr>,
    pub sessions: usize,
    pub user_count: usize,
    pub authenticated: usize,
    pub draining: usize,
    pub max_connections: usize,
    pub max_total_read_average: u64,
    pub max_session_read_average: u64,
    pub min_session_read_average: u64,
    pub session_read_average_limit: u64,
    pub aggregate_read_average: u64,
    pub admission_paused: bool,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug)]
struct Thresholds {
    max_total: AtomicU64,
    max_session: AtomicU64,
    min_session: AtomicU64,
}

struct ServerInner {
    config: ServerConfig,
    admission: AdmissionConfig,
    thresholds: Thresholds,
    agent: KeyAgent,
    metrics: Metrics,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    started: AtomicBool,
    shutdown: CancellationToken,
    callback: OnceLock<Arc<Callback>>,
    datagram: OnceLock<Arc<DatagramChannel>>,
    local_addr: OnceLock<SocketAddr>,
    accept_paused: watch::Sender<bool>,
    aggregate: AtomicU64,
    closed_tx: mpsc::UnboundedSender<SessionId>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionId>>>,
}

/// Cheap-to-clone handle to one server instance
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.inner.config.address)
            .field("udp_address", &self.inner.config.udp_address)
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(config: &NetworkConfig, agent: KeyAgent) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (accept_paused, _) = watch::channel(false);
        let admission = config.admission.clone();

        Self {
            inner: Arc::new(ServerInner {
                config: config.server.clone(),
                thresholds: Thresholds {
                    max_total: AtomicU64::new(admission.max_total_read_average),
                    max_session: AtomicU64::new(admission.max_session_read_average),
                    min_session: AtomicU64::new(admission.min_session_read_average),
                },
                admission,
                agent,
                metrics: Metrics::new(),
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                callback: OnceLock::new(),
                datagram: OnceLock::new(),
                local_addr: OnceLock::new(),
                accept_paused,
                aggregate: AtomicU64::new(0),
                closed_tx,
                closed_rx: Mutex::new(Some(closed_rx)),
            }),
        }
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Arc<Session>>>> {
        self.inner
            .sessions
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }

    /// Bind both endpoints and begin accepting.
    ///
    /// `callback` receives every decoded command from every session and every
    /// datagram. Calling `start` twice is an error.
    #[instrument(skip_all, fields(address = %self.inner.config.address))]
    pub async fn start<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Server, Inbound) + Send + Sync + 'static,
    {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyStarted);
        }

        let bound = async {
            let listener = TcpListener::bind(&self.inner.config.address).await?;
            let datagram = DatagramChannel::bind(&self.inner.config.udp_address).await?;
            Ok::<_, ProtocolError>((listener, datagram))
        }
        .await;
        let (listener, datagram) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.inner.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let local = listener.local_addr()?;
        let datagram = Arc::new(datagram);
        let _ = self.inner.local_addr.set(local);
        let _ = self.inner.datagram.set(datagram.clone());
        let _ = self.inner.callback.set(Arc::new(callback));

        info!(
            tcp = %local,
            udp = ?datagram.local_addr().ok(),
            public_key = %hex(&self.inner.agent.public_key()),
            "Server listening"
        );

        tokio::spawn(self.clone().accept_loop(listener));
        tokio::spawn(datagram.receive_loop(self.clone()));
        tokio::spawn(self.clone().maintenance_loop());
        Ok(())
    }

    async fn accept_loop(self, listener: TcpListener) {
        let shutdown = self.inner.shutdown.clone();
        let mut paused = self.inner.accept_paused.subscribe();

        loop {
            while *paused.borrow_and_update() {
                debug!("Accepts paused by aggregate read average");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = paused.changed() => if changed.is_err() { return },
                }
            }

            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => {
                    self.inner.metrics.connection_error();
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        info!("Accept loop stopped");
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }
        if let Err(e) = self.attach(stream, peer) {
            warn!(%peer, error = %e, "Connection refused");
        }
    }

    async fn maintenance_loop(self) {
        let shutdown = self.inner.shutdown.clone();
        let closed_rx = self.inner.closed_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(mut closed_rx) = closed_rx else {
            return;
        };
        let mut ticker = tokio::time::interval(self.inner.admission.accounting_window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_session() {
                        warn!(error = %e, "Admission pass failed");
                    }
                }
                Some(id) = closed_rx.recv() => self.prune_one(id),
            }
        }
    }

    fn prune_one(&self, id: SessionId) {
        if let Ok(mut sessions) = self.sessions() {
            if sessions.get(&id).is_some_and(|s| s.state() == SessionState::Closed) {
                sessions.remove(&id);
                debug!(session = id, "Pruned closed session");
            }
        }
    }

    /// Adopt an already-connected stream as a new session.
    ///
    /// The accept loop uses this for TCP; any duplex byte stream works.
    pub fn attach<S>(&self, stream: S, peer: SocketAddr) -> Result<SessionHandle>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if !self.inner.started.load(Ordering::Acquire) || self.inner.shutdown.is_cancelled() {
            return Err(ProtocolError::NotStarted);
        }

        let hello = handshake::server_hello(&self.inner.agent)?.encode()?;
        let (tx, rx) = mpsc::channel(self.inner.config.outbound_queue_limit.max(1));
        let meter = SharedMeter::new(ReadMeter::new(
            Instant::now(),
            self.inner.admission.accounting_window,
            self.inner.admission.average_windows,
        ));

        // Activation and the hello happen under the session lock, so a
        // concurrent stop either refuses this session or finds it Active
        let session = {
            let mut sessions = self.sessions()?;
            if self.inner.shutdown.is_cancelled() {
                return Err(ProtocolError::NotStarted);
            }
            let live = sessions
                .values()
                .filter(|s| s.state() != SessionState::Closed)
                .count();
            if live >= self.inner.config.max_connections {
                self.inner.metrics.connection_refused();
                return Err(ProtocolError::AdmissionRejected(constants::ERR_SERVER_FULL.into()));
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let session = Arc::new(Session::new(id, peer, tx, self.inner.shutdown.child_token(), meter));
            session.activate();
            session.send(hello.clone())?;
            sessions.insert(id, session.clone());
            session
        };

        self.inner.metrics.command_sent(hello.len() as u64);
        self.inner.metrics.connection_accepted();

        let handle = session.handle();
        info!(session = %handle, "Session active");

        session::spawn(stream, session, rx, self.clone(), self.limits());
        Ok(handle)
    }

    fn limits(&self) -> SessionLimits {
        let c = &self.inner.config;
        SessionLimits {
            max_frame_size: c.max_frame_size,
            max_protocol_violations: c.max_protocol_violations,
            max_unknown_opcodes: c.max_unknown_opcodes,
            require_sealed_login: c.require_sealed_login,
        }
    }

    /// Stop with [`StopReason::Administrative`]
    pub fn stop(&self) {
        self.stop_with(StopReason::Administrative);
    }

    /// Move every live session to Draining, close both endpoints and end the
    /// accept loop. In-flight writes still complete; see [`Server::drain`].
    ///
    /// Callbacks already running are not awaited, so a command being
    /// dispatched at this point is delivered at most once.
    pub fn stop_with(&self, reason: StopReason) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let closing = match self.sessions() {
            Ok(sessions) => {
                let mut closing = 0;
                for session in sessions.values() {
                    if session.close(CloseReason::Shutdown) {
                        closing += 1;
                    }
                }
                // cancelled before the lock drops so attach cannot slip in
                self.inner.shutdown.cancel();
                closing
            }
            Err(_) => {
                self.inner.shutdown.cancel();
                0
            }
        };

        match reason {
            StopReason::Fault => warn!(%reason, sessions = closing, "Server stopping"),
            _ => info!(%reason, sessions = closing, "Server stopping"),
        }
        self.inner.metrics.log_metrics();
    }

    /// Wait until every session has reached Closed, pruning as they do
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        with_timeout_error(
            async {
                loop {
                    {
                        let mut sessions = self.sessions()?;
                        sessions.retain(|_, s| s.state() != SessionState::Closed);
                        if sessions.is_empty() {
                            return Ok(());
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            timeout,
        )
        .await
    }

    /// Enqueue `command` for one session
    pub fn send(&self, handle: &SessionHandle, command: &Command) -> Result<()> {
        let frame = command.encode()?;
        let session = self
            .sessions()?
            .get(&handle.id())
            .cloned()
            .ok_or(ProtocolError::SessionUnavailable(handle.id()))?;
        session.send(frame.clone())?;
        self.inner.metrics.command_sent(frame.len() as u64);
        Ok(())
    }

    /// Enqueue `command` for every Active session; returns how many accepted it
    pub fn send_all(&self, command: &Command) -> Result<usize> {
        self.broadcast(command, None)
    }

    /// Like [`Server::send_all`] but skips `excluded`
    pub fn send_others(&self, command: &Command, excluded: &SessionHandle) -> Result<usize> {
        self.broadcast(command, Some(excluded.id()))
    }

    fn broadcast(&self, command: &Command, excluded: Option<SessionId>) -> Result<usize> {
        let frame = command.encode()?;
        let sessions = self.sessions()?;
        let mut delivered = 0;

        for session in sessions.values() {
            if Some(session.id()) == excluded || !session.is_active() {
                continue;
            }
            match session.send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.inner.metrics.command_sent(frame.len() as u64);
                }
                Err(e) => debug!(session = %session.handle(), error = %e, "Broadcast skipped session"),
            }
        }
        Ok(delivered)
    }

    /// Close one session through its handle
    pub fn close_session(&self, handle: &SessionHandle) -> Result<()> {
        let session = self
            .sessions()?
            .get(&handle.id())
            .cloned()
            .ok_or(ProtocolError::SessionUnavailable(handle.id()))?;
        session.close(CloseReason::Local);
        Ok(())
    }

    /// Run one admission-control pass at the current time
    pub fn refresh_session(&self) -> Result<RefreshOutcome> {
        self.refresh_session_at(Instant::now())
    }

    /// Run one admission-control pass as if the time were `now`.
    ///
    /// Calling it twice with nothing changed in between removes nothing the
    /// second time.
    pub fn refresh_session_at(&self, now: Instant) -> Result<RefreshOutcome> {
        let floor = self.min_session_read_average();
        let max_session = self.max_session_read_average();
        let max_total = self.max_total_read_average();
        let idle_timeout = self.inner.admission.idle_timeout;

        let mut outcome = RefreshOutcome::default();
        let mut sessions = self.sessions()?;

        for session in sessions.values() {
            if !session.is_active() {
                continue;
            }
            let rolled = session.roll(now, floor);

            // a burst in the window that just closed counts even when the
            // quieter history keeps the average under the limit
            if rolled.average > max_session || rolled.peak_window > max_session {
                warn!(
                    session = %session.handle(),
                    average = rolled.average,
                    window = rolled.peak_window,
                    limit = max_session,
                    "{}", constants::ERR_SESSION_FLOODING
                );
                session.close(CloseReason::Flooding);
                self.inner.metrics.admission_rejection();
                outcome.flooding += 1;
                continue;
            }

            if let Some(since) = rolled.quiet_since {
                if now.saturating_duration_since(since) >= idle_timeout {
                    info!(
                        session = %session.handle(),
                        average = rolled.average,
                        floor,
                        "{}", constants::ERR_SESSION_IDLE
                    );
                    session.close(CloseReason::Idle);
                    outcome.idle += 1;
                    continue;
                }
            }

            outcome.aggregate_read_average =
                outcome.aggregate_read_average.saturating_add(rolled.average);
        }

        let before = sessions.len();
        sessions.retain(|_, s| s.state() != SessionState::Closed);
        outcome.pruned = before - sessions.len();
        drop(sessions);

        outcome.admission_paused = outcome.aggregate_read_average > max_total;
        self.inner
            .aggregate
            .store(outcome.aggregate_read_average, Ordering::Relaxed);
        self.inner.accept_paused.send_if_modified(|paused| {
            if *paused == outcome.admission_paused {
                return false;
            }
            *paused = outcome.admission_paused;
            if outcome.admission_paused {
                warn!(
                    aggregate = outcome.aggregate_read_average,
                    limit = max_total,
                    "Aggregate read average above limit, pausing accepts"
                );
            } else {
                info!(aggregate = outcome.aggregate_read_average, "Resuming accepts");
            }
            true
        });

        Ok(outcome)
    }

    /// Sessions currently Active, authenticated or not
    pub fn get_user_count(&self) -> usize {
        self.sessions()
            .map(|s| s.values().filter(|s| s.is_active()).count())
            .unwrap_or(0)
    }

    /// Whether no session, live or awaiting prune, is held
    pub fn is_empty(&self) -> bool {
        self.sessions().map(|s| s.is_empty()).unwrap_or(true)
    }

    pub fn session_state(&self, handle: &SessionHandle) -> Option<SessionState> {
        self.sessions().ok()?.get(&handle.id()).map(|s| s.state())
    }

    /// Identity bound by a successful LOGIN
    pub fn account(&self, handle: &SessionHandle) -> Option<AccountIdentity> {
        self.sessions().ok()?.get(&handle.id())?.account()
    }

    pub fn session_read_average(&self, handle: &SessionHandle) -> Option<u64> {
        self.sessions().ok()?.get(&handle.id()).map(|s| s.read_average())
    }

    pub fn is_accepting(&self) -> bool {
        !*self.inner.accept_paused.borrow() && !self.inner.shutdown.is_cancelled()
    }

    /// Structured snapshot for monitoring
    pub fn status(&self) -> Result<ServerStatus> {
        let (sessions, user_count, authenticated, draining) = {
            let sessions = self.sessions()?;
            (
                sessions.len(),
                sessions.values().filter(|s| s.is_active()).count(),
                sessions
                    .values()
                    .filter(|s| s.is_active() && s.is_authenticated())
                    .count(),
                sessions
                    .values()
                    .filter(|s| s.state() == SessionState::Draining)
                    .count(),
            )
        };

        Ok(ServerStatus {
            address: self.local_addr(),
            udp_address: self.udp_local_addr(),
            sessions,
            user_count,
            authenticated,
            draining,
            max_connections: self.inner.config.max_connections,
            max_total_read_average: self.max_total_read_average(),
            max_session_read_average: self.max_session_read_average(),
            min_session_read_average: self.min_session_read_average(),
            session_read_average_limit: limit_for(
                user_count,
                self.max_total_read_average(),
                self.max_session_read_average(),
                self.min_session_read_average(),
            ),
            aggregate_read_average: self.inner.aggregate.load(Ordering::Relaxed),
            admission_paused: *self.inner.accept_paused.borrow(),
            metrics: self.inner.metrics.snapshot(),
        })
    }

    /// [`Server::status`] as JSON; no side effects
    pub fn get_status_json(&self) -> Result<String> {
        serde_json::to_string(&self.status()?)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Fair share of the server-wide budget for one session, kept between
    /// the per-session minimum and maximum
    pub fn session_read_average_limit(&self) -> u64 {
        limit_for(
            self.get_user_count(),
            self.max_total_read_average(),
            self.max_session_read_average(),
            self.min_session_read_average(),
        )
    }

    pub fn max_total_read_average(&self) -> u64 {
        self.inner.thresholds.max_total.load(Ordering::Relaxed)
    }

    pub fn max_session_read_average(&self) -> u64 {
        self.inner.thresholds.max_session.load(Ordering::Relaxed)
    }

    pub fn min_session_read_average(&self) -> u64 {
        self.inner.thresholds.min_session.load(Ordering::Relaxed)
    }

    pub fn set_max_total_read_average(&self, bytes: u64) {
        self.inner.thresholds.max_total.store(bytes, Ordering::Relaxed);
    }

    pub fn set_max_session_read_average(&self, bytes: u64) {
        self.inner.thresholds.max_session.store(bytes, Ordering::Relaxed);
    }

    pub fn set_min_session_read_average(&self, bytes: u64) {
        self.inner.thresholds.min_session.store(bytes, Ordering::Relaxed);
    }

    /// Send a burst of probes to `addr`, each with the next sequence number
    pub async fn send_probe(&self, addr: SocketAddr) -> Result<Vec<u8>> {
        let channel = self.datagram_channel()?;
        channel.send_probe_burst(addr, &self.inner.metrics).await
    }

    /// Send one command on the connectionless channel
    pub async fn send_datagram(&self, addr: SocketAddr, command: &Command) -> Result<()> {
        let channel = self.datagram_channel()?;
        channel.send(addr, command).await?;
        self.inner.metrics.datagram_sent();
        Ok(())
    }

    fn datagram_channel(&self) -> Result<&Arc<DatagramChannel>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ProtocolError::NotStarted);
        }
        self.inner.datagram.get().ok_or(ProtocolError::NotStarted)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.inner.datagram.get().and_then(|d| d.local_addr().ok())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.inner.agent.public_key()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub(crate) fn key_agent(&self) -> &KeyAgent {
        &self.inner.agent
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn closed_notifier(&self) -> mpsc::UnboundedSender<SessionId> {
        self.inner.closed_tx.clone()
    }

    /// Hand a command to the registered callback
    pub(crate) fn deliver(&self, inbound: Inbound) {
        if let Some(callback) = self.inner.callback.get() {
            callback(self, inbound);
        }
    }
}

fn limit_for(users: usize, max_total: u64, max_session: u64, min_session: u64) -> u64 {
    let share = max_total / users.max(1) as u64;
    share.min(max_session).max(min_session)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
