//! Single-threaded readiness loop serving framed connections.
//!
//! ```text
//!                 ┌──────────────────────── EventServer::run ────────────────────────┐
//!   poll ───────▶ │ LISTENER ──▶ accept until WouldBlock ──▶ ConnectionRegistry::add │
//!                 │ WAKER    ──▶ re-check running flag                               │
//!                 │ Token(n) ──▶ registry.with(n): flush, read, extract frames       │
//!                 │                 │                                                │
//!                 │                 ▼ (registry lock released)                       │
//!                 │          DispatchTable::dispatch_from(origin, tag, payload)      │
//!                 └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connection ids double as poll tokens; tokens 0 and 1 are reserved for the
//! listener and the waker. Sockets are registered once for both directions and
//! never re-registered. One event reads at most `MAX_READS_PER_EVENT` times and
//! collects at most `MAX_FRAMES_PER_EVENT` frames; a connection that hits either
//! cap goes on a backlog that is serviced again before the next blocking poll.

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Registry, Token, Waker,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    dispatch::{DispatchError, DispatchTable, Origin},
    net::{
        config::{BackpressurePolicy, ServerConfig, ViolationPolicy},
        connection::{ConnectionHandler, ConnectionStats, Transport},
        event::Readiness,
        poll::PollHandle,
        registry::ConnectionRegistry,
        subsystem::{self, SubsystemGuard},
        ConnectionId, NetworkError, SendError,
    },
    protocol::{
        deserialize_frame, resync_offset, Frame, FrameError, FrameFlags, FrameHeader, Payload,
    },
    thread_pool::{PoolError, TaskHandle, WorkerPool},
};

pub const LISTENER: Token = Token(0);
pub const WAKER: Token = Token(1);
const FIRST_CONNECTION_ID: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Listening = 1,
    Running = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Listening,
            2 => ServerState::Running,
            _ => ServerState::Stopped,
        }
    }
}

struct Shared {
    config: ServerConfig,
    registry: ConnectionRegistry<TcpStream>,
    dispatch: Arc<DispatchTable>,
    pool: WorkerPool,
    state: AtomicU8,
    running: AtomicBool,
    waker: Arc<Waker>,
    poll_registry: Registry,
    next_id: AtomicUsize,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) -> ServerState {
        ServerState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = addr;
    }

    fn admit(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<ConnectionId, NetworkError> {
        if self.registry.len() >= self.config.max_connections {
            return Err(NetworkError::MaxConnectionsReached(peer));
        }

        if self.config.no_delay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
            }
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.poll_registry
            .register(&mut stream, id.token(), Interest::READABLE | Interest::WRITABLE)?;

        let conn = ConnectionHandler::new(
            id,
            stream,
            peer,
            self.config.read_buffer_size,
            self.config.write_buffer_size,
        )?;
        self.registry.add(conn)?;

        info!(conn_id = %id, peer = %peer, "connection accepted");
        Ok(id)
    }

    fn close_connection(&self, id: ConnectionId) -> bool {
        let removed = match self.registry.remove(id) {
            Ok(removed) => removed,
            Err(e) => {
                error!(conn_id = %id, error = %e, "failed to remove connection");
                return false;
            }
        };

        match removed {
            Some(conn) => {
                self.teardown(conn);
                true
            }
            None => false,
        }
    }

    fn teardown(&self, mut conn: ConnectionHandler<TcpStream>) {
        if let Err(e) = self.poll_registry.deregister(conn.stream_mut()) {
            trace!(conn_id = %conn.id(), error = %e, "deregister failed");
        }
        conn.close();
        info!(
            conn_id = %conn.id(),
            peer = %conn.peer_addr(),
            received = conn.bytes_received(),
            sent = conn.bytes_sent(),
            "connection closed"
        );
    }

    fn on_send_failure(&self, id: ConnectionId, err: &SendError) {
        match err {
            SendError::WriteBufferFull { .. } => {
                warn!(conn_id = %id, error = %err, "write buffer full");
                if self.config.backpressure_policy == BackpressurePolicy::Disconnect {
                    self.close_connection(id);
                }
            }
            SendError::Io(_) | SendError::NotActive(_) => {
                debug!(conn_id = %id, error = %err, "send failed, closing connection");
                self.close_connection(id);
            }
            _ => {}
        }
    }
}

/// Cloneable handle to a server, usable from handlers and other threads.
#[derive(Clone)]
pub struct ServerContext {
    shared: Arc<Shared>,
}

impl ServerContext {
    /// Queues `data` on one connection.
    ///
    /// A connection whose socket failed is closed. A full write buffer is
    /// handled according to the configured [`BackpressurePolicy`].
    pub fn send_to(&self, id: ConnectionId, data: &[u8]) -> Result<(), SendError> {
        self.shared.registry.send_to(id, data).map_err(|err| {
            self.shared.on_send_failure(id, &err);
            err
        })
    }

    /// Queues `data` on every active connection; returns how many accepted it.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        match self.shared.registry.broadcast(data) {
            Ok(report) => {
                for (id, err) in &report.failed {
                    self.shared.on_send_failure(*id, err);
                }
                report.delivered
            }
            Err(e) => {
                error!(error = %e, "broadcast failed");
                0
            }
        }
    }

    pub fn send_frame<P: Payload>(
        &self,
        id: ConnectionId,
        message: &P,
        flags: FrameFlags,
    ) -> Result<(), SendError> {
        let frame = message.to_frame(flags)?;
        self.send_to(id, &frame)
    }

    pub fn broadcast_frame<P: Payload>(
        &self,
        message: &P,
        flags: FrameFlags,
    ) -> Result<usize, FrameError> {
        let frame = message.to_frame(flags)?;
        Ok(self.broadcast(&frame))
    }

    /// Returns whether a connection with that id was open.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.shared.close_connection(id)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        self.shared.registry.stats(id)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.shared.registry.total_bytes_received()
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.shared.registry.total_bytes_sent()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `task` on the server's worker pool.
    pub fn spawn<F, R>(&self, task: F) -> Result<TaskHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.pool.submit(task)
    }

    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.pool.execute(task)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    pub fn dispatch_table(&self) -> &Arc<DispatchTable> {
        &self.shared.dispatch
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Asks the event loop to exit. Returns immediately; the loop closes every
    /// connection on its way out.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Err(e) = self.shared.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }

    /// Services one readiness event. Returns true when the read budget ran out
    /// and the connection may still have unread input.
    fn on_ready(&self, id: ConnectionId, event: Readiness) -> bool {
        let policy = self.shared.config.violation_policy;
        let serviced = match self
            .shared
            .registry
            .with(id, |conn| service_connection(conn, event, policy))
        {
            Ok(Some(serviced)) => serviced,
            Ok(None) => return false,
            Err(e) => {
                error!(conn_id = %id, error = %e, "connection lookup failed");
                return false;
            }
        };

        let violated = self.dispatch_frames(id, serviced.frames, policy);
        if serviced.close || violated {
            self.close_connection(id);
            return false;
        }
        serviced.more
    }

    /// Returns true when a frame violated the protocol under
    /// [`ViolationPolicy::Disconnect`]; later frames are then skipped.
    fn dispatch_frames(&self, id: ConnectionId, frames: Vec<Frame>, policy: ViolationPolicy) -> bool {
        if frames.is_empty() {
            return false;
        }

        let origin = Origin::new(id, self.clone());
        for frame in frames {
            let tag = frame.message_type();
            match self
                .shared
                .dispatch
                .dispatch_from(&origin, tag, &frame.payload)
            {
                Ok(()) => debug!(conn_id = %id, tag, len = frame.payload.len(), "frame dispatched"),
                Err(e @ (DispatchError::UnknownMessageType(_) | DispatchError::Decode { .. })) => {
                    warn!(conn_id = %id, error = %e, "protocol violation");
                    if policy == ViolationPolicy::Disconnect {
                        return true;
                    }
                }
                Err(e) => warn!(conn_id = %id, error = %e, "dispatch failed"),
            }
        }
        false
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Reads performed for one connection per readiness event.
const MAX_READS_PER_EVENT: usize = 32;

/// Frames collected from one connection per readiness event.
const MAX_FRAMES_PER_EVENT: usize = 256;

#[derive(Debug, Default)]
struct Serviced {
    frames: Vec<Frame>,
    close: bool,
    /// Budget ran out with input possibly left in the socket or the buffer.
    more: bool,
}

/// Handles one readiness event on one connection, with the registry locked.
fn service_connection<S: Transport>(
    conn: &mut ConnectionHandler<S>,
    event: Readiness,
    policy: ViolationPolicy,
) -> Serviced {
    let mut serviced = Serviced::default();

    if event.is_writable() {
        if let Err(e) = conn.handle_write_event() {
            error!(conn_id = %conn.id(), error = %e, "write failed");
        }
    }

    if event.is_readable() || event.is_closed() {
        let mut reads = 0;
        loop {
            // frames left over from an earlier budgeted pass come out first
            if extract_frames(conn, policy, &mut serviced.frames, MAX_FRAMES_PER_EVENT) {
                serviced.close = true;
                break;
            }
            if reads == MAX_READS_PER_EVENT || serviced.frames.len() >= MAX_FRAMES_PER_EVENT {
                trace!(conn_id = %conn.id(), reads, frames = serviced.frames.len(), "read budget spent");
                serviced.more = true;
                break;
            }
            match conn.handle_read_event() {
                Ok(true) => reads += 1,
                Ok(false) => break,
                Err(e) => {
                    error!(conn_id = %conn.id(), error = %e, "read failed");
                    break;
                }
            }
        }
    }

    // a half-closed peer still gets its buffered frames on the next pass
    if event.is_error() || (!conn.is_active() && !serviced.more) {
        serviced.close = true;
    }
    if serviced.close {
        serviced.more = false;
    }
    serviced
}

/// Moves complete frames out of the read buffer, in receipt order, until
/// `out` holds `limit` frames.
///
/// Returns true when a malformed frame was seen under
/// [`ViolationPolicy::Disconnect`]; frames before it are still returned.
fn extract_frames<S: Transport>(
    conn: &mut ConnectionHandler<S>,
    policy: ViolationPolicy,
    out: &mut Vec<Frame>,
    limit: usize,
) -> bool {
    let id = conn.id();
    let buffered = conn.buffered();
    let mut offset = 0;
    let mut found = Vec::new();
    let mut violated = false;

    while offset < buffered.len() && out.len() + found.len() < limit {
        let rest = &buffered[offset..];
        match deserialize_frame(rest) {
            Ok(Some((frame, len))) => {
                let start = offset + FrameHeader::SIZE;
                found.push((*frame.header, start..start + frame.payload.len()));
                offset += len;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "malformed frame");
                if policy == ViolationPolicy::Disconnect {
                    violated = true;
                    break;
                }
                offset += match e {
                    FrameError::ChecksumMismatch { frame_len, .. } => frame_len,
                    _ => resync_offset(rest),
                };
            }
        }
    }

    if offset == 0 {
        return violated;
    }

    // one copy per pass; payloads are slices of it
    let consumed = Bytes::copy_from_slice(&buffered[..offset]);
    out.extend(found.into_iter().map(|(header, range)| Frame {
        header,
        payload: consumed.slice(range),
    }));
    conn.consume(offset);
    violated
}

/// Readiness-driven frame server.
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
/// use msgloop::{
///     dispatch::DispatchTable,
///     net::{EventServer, ServerConfig},
///     protocol::EchoMessage,
/// };
///
/// let dispatch = Arc::new(DispatchTable::new());
/// dispatch
///     .register(|echo: &EchoMessage, origin| origin.reply(echo))
///     .unwrap();
///
/// let mut server = EventServer::new(ServerConfig::default(), dispatch).unwrap();
/// server.start("127.0.0.1", 9000).unwrap();
/// server.run(Some(Duration::from_millis(100))).unwrap();
/// ```
pub struct EventServer {
    poll: PollHandle,
    events: Events,
    listener: Option<TcpListener>,
    subsystem: Option<SubsystemGuard>,
    context: ServerContext,
    /// Connections whose read budget ran out; serviced again before blocking.
    backlog: Vec<ConnectionId>,
}

impl EventServer {
    pub fn new(config: ServerConfig, dispatch: Arc<DispatchTable>) -> Result<Self, NetworkError> {
        config.validate()?;

        let poll = PollHandle::new(WAKER)?;
        let poll_registry = poll.registry().try_clone()?;
        let pool = WorkerPool::new(config.worker_threads)?;
        let events = Events::with_capacity(config.events_capacity);

        let shared = Shared {
            waker: poll.waker(),
            config,
            registry: ConnectionRegistry::new(),
            dispatch,
            pool,
            state: AtomicU8::new(ServerState::Stopped as u8),
            running: AtomicBool::new(false),
            poll_registry,
            next_id: AtomicUsize::new(FIRST_CONNECTION_ID),
            local_addr: Mutex::new(None),
        };

        Ok(Self {
            poll,
            events,
            listener: None,
            subsystem: None,
            context: ServerContext {
                shared: Arc::new(shared),
            },
            backlog: Vec::new(),
        })
    }

    fn shared(&self) -> &Shared {
        &self.context.shared
    }

    /// Binds a listener on `address:port`. Port 0 picks a free port, see
    /// [`local_addr`](Self::local_addr).
    pub fn start(&mut self, address: &str, port: u16) -> Result<(), NetworkError> {
        if self.state() != ServerState::Stopped {
            return Err(NetworkError::InvalidState(format!(
                "cannot start a server that is {:?}",
                self.state()
            )));
        }

        // released again on any early return below
        let guard = subsystem::acquire();

        let bind_error = |source| NetworkError::Bind {
            addr: format!("{address}:{port}"),
            source,
        };
        let addr = (address, port)
            .to_socket_addrs()
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "address resolved to nothing",
                ))
            })?;

        let mut listener = TcpListener::bind(addr).map_err(bind_error)?;
        self.poll
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        self.listener = Some(listener);
        self.subsystem = Some(guard);
        self.shared().set_local_addr(Some(local_addr));
        self.shared().running.store(true, Ordering::Release);
        self.shared().set_state(ServerState::Listening);

        info!(addr = %local_addr, "server listening");
        Ok(())
    }

    /// Runs the event loop until [`stop`](Self::stop) is requested through a
    /// [`ServerContext`], then closes everything.
    ///
    /// `timeout` bounds each poll; `None` waits indefinitely for readiness.
    /// Returns immediately if the server is not listening.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<(), NetworkError> {
        if self.state() != ServerState::Listening {
            debug!(state = ?self.state(), "run called on a server that is not listening");
            return Ok(());
        }

        self.shared().set_state(ServerState::Running);
        info!("event loop running");

        let result = self.event_loop(timeout);
        if let Err(e) = &result {
            error!(error = %e, "event loop failed");
        }
        self.stop();
        result
    }

    fn event_loop(&mut self, timeout: Option<Duration>) -> Result<(), NetworkError> {
        while self.context.is_running() {
            let wait = if self.backlog.is_empty() {
                timeout
            } else {
                Some(Duration::ZERO)
            };
            self.poll.poll(&mut self.events, wait)?;

            for event in self.events.iter() {
                let event = Readiness::from(event);
                match event.token() {
                    LISTENER => self.accept_connections(),
                    WAKER => trace!("event loop woken"),
                    token => {
                        let id = ConnectionId::from(token);
                        if self.context.on_ready(id, event) && !self.backlog.contains(&id) {
                            self.backlog.push(id);
                        }
                    }
                }
            }

            // edge-triggered: no new event arrives for input already buffered
            for id in std::mem::take(&mut self.backlog) {
                let resume = Readiness::new(id.token(), true, false);
                if self.context.on_ready(id, resume) && !self.backlog.contains(&id) {
                    self.backlog.push(id);
                }
            }
        }
        self.backlog.clear();
        Ok(())
    }

    fn accept_connections(&self) {
        let Some(listener) = &self.listener else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.shared().admit(stream, peer) {
                        warn!(peer = %peer, error = %e, "connection rejected");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %NetworkError::Accept(e), "accept failed");
                    break;
                }
            }
        }
    }

    /// Closes every connection and the listener. Idempotent.
    pub fn stop(&mut self) {
        self.shared().running.store(false, Ordering::Release);
        if self.shared().set_state(ServerState::Stopped) == ServerState::Stopped {
            return;
        }

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.deregister(&mut listener) {
                trace!(error = %e, "listener deregister failed");
            }
        }

        let connections = self.shared().registry.drain();
        let closed = connections.len();
        for conn in connections {
            self.shared().teardown(conn);
        }

        self.shared().set_local_addr(None);
        self.subsystem = None;
        info!(closed, "server stopped");
    }

    pub fn state(&self) -> ServerState {
        self.shared().state()
    }

    /// Handle for stopping the server or sending from other threads.
    pub fn context(&self) -> ServerContext {
        self.context.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.context.local_addr()
    }

    pub fn send_to(&self, id: ConnectionId, data: &[u8]) -> Result<(), SendError> {
        self.context.send_to(id, data)
    }

    pub fn broadcast(&self, data: &[u8]) -> usize {
        self.context.broadcast(data)
    }

    pub fn send_frame<P: Payload>(
        &self,
        id: ConnectionId,
        message: &P,
        flags: FrameFlags,
    ) -> Result<(), SendError> {
        self.context.send_frame(id, message, flags)
    }

    pub fn broadcast_frame<P: Payload>(
        &self,
        message: &P,
        flags: FrameFlags,
    ) -> Result<usize, FrameError> {
        self.context.broadcast_frame(message, flags)
    }

    pub fn close_connection(&self, id: ConnectionId) -> bool {
        self.context.close_connection(id)
    }

    pub fn connection_count(&self) -> usize {
        self.context.connection_count()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.context.connection_ids()
    }

    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        self.context.connection_stats(id)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.context.total_bytes_received()
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.context.total_bytes_sent()
    }

    pub fn dispatch_table(&self) -> &Arc<DispatchTable> {
        self.context.dispatch_table()
    }

    pub fn pool(&self) -> &WorkerPool {
        self.context.pool()
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.stop();
        self.shared().pool.shutdown();
    }
}

impl fmt::Debug for EventServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish()
    }
}
