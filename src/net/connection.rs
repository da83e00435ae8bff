//! Per-connection buffered, non-blocking I/O.
//!
//! ```text
//! read_buf:  [ received, not yet consumed | free ............ ]
//!             0                      read_len             capacity
//!
//! write_buf: [ queued, not yet written   | free ............ ]
//!             0                      write_len            capacity
//! ```
//!
//! Both buffers have a fixed capacity chosen at construction. Consumed or
//! written bytes are compacted to the front so the free space is always a
//! single tail.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
};

use mio::{net::TcpStream, Token};
use tracing::{debug, trace};

use crate::net::{NetworkError, SendError};

/// Server-unique connection identifier. Also the connection's poll token.
///
/// Token-sized, so every id maps to exactly one token on any target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn token(&self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte stream a [`ConnectionHandler`] drives.
pub trait Transport: Read + Write + Send + 'static {
    /// Shut both directions down. Errors are ignored by the caller.
    fn close_transport(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn close_transport(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Active,
    /// Peer closed or the stream failed; waiting to be torn down.
    Closing,
    Closed,
}

/// Snapshot of one connection's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub state: ConnectionState,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub buffered: usize,
    pub pending_write: usize,
}

pub type CloseCallback = Box<dyn FnOnce(ConnectionId) + Send>;

pub struct ConnectionHandler<S = TcpStream> {
    id: ConnectionId,
    stream: S,
    peer_addr: SocketAddr,
    read_buf: Box<[u8]>,
    read_len: usize,
    write_buf: Box<[u8]>,
    write_len: usize,
    bytes_received: u64,
    bytes_sent: u64,
    state: ConnectionState,
    on_close: Option<CloseCallback>,
}

impl<S: Transport> ConnectionHandler<S> {
    pub fn new(
        id: ConnectionId,
        stream: S,
        peer_addr: SocketAddr,
        read_capacity: usize,
        write_capacity: usize,
    ) -> Result<Self, NetworkError> {
        if read_capacity == 0 || write_capacity == 0 {
            return Err(NetworkError::Configuration(
                "connection buffers must have non-zero capacity".to_string(),
            ));
        }

        Ok(Self {
            id,
            stream,
            peer_addr,
            read_buf: vec![0; read_capacity].into_boxed_slice(),
            read_len: 0,
            write_buf: vec![0; write_capacity].into_boxed_slice(),
            write_len: 0,
            bytes_received: 0,
            bytes_sent: 0,
            state: ConnectionState::Active,
            on_close: None,
        })
    }

    /// Performs one receive into the free tail of the read buffer.
    ///
    /// `Ok(true)` when bytes arrived. `Ok(false)` when the socket would block,
    /// the buffer is full, the connection is no longer active, or the peer
    /// closed the stream (the state then moves to `Closing`). A hard error
    /// also moves to `Closing` and is returned.
    pub fn handle_read_event(&mut self) -> io::Result<bool> {
        if self.state != ConnectionState::Active || self.read_buffer_full() {
            return Ok(false);
        }

        loop {
            match self.stream.read(&mut self.read_buf[self.read_len..]) {
                Ok(0) => {
                    debug!(conn_id = %self.id, "peer closed connection");
                    self.begin_closing();
                    return Ok(false);
                }
                Ok(n) => {
                    self.read_len += n;
                    self.bytes_received += n as u64;
                    trace!(conn_id = %self.id, bytes = n, "read");
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn_id = %self.id, error = %e, "read failed");
                    self.begin_closing();
                    return Err(e);
                }
            }
        }
    }

    /// Writes queued bytes until the buffer is empty or the socket would block.
    ///
    /// Returns whether bytes remain queued.
    pub fn handle_write_event(&mut self) -> io::Result<bool> {
        if self.state == ConnectionState::Closed {
            return Ok(false);
        }

        let mut written = 0;
        let result = loop {
            if written == self.write_len {
                break Ok(());
            }
            match self.stream.write(&self.write_buf[written..self.write_len]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        if written > 0 {
            self.write_buf.copy_within(written..self.write_len, 0);
            self.write_len -= written;
            self.bytes_sent += written as u64;
            trace!(conn_id = %self.id, bytes = written, pending = self.write_len, "flushed");
        }

        match result {
            Ok(()) => Ok(self.write_len > 0),
            Err(e) => {
                debug!(conn_id = %self.id, error = %e, "write failed");
                self.begin_closing();
                Err(e)
            }
        }
    }

    /// Queues `data` and tries to write it out straight away.
    ///
    /// All-or-nothing: if `data` does not fit in the free write space nothing
    /// is queued.
    pub fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        if data.is_empty() {
            return Err(SendError::Empty);
        }
        if self.state != ConnectionState::Active {
            return Err(SendError::NotActive(self.id));
        }

        let available = self.write_buf.len() - self.write_len;
        if data.len() > available {
            return Err(SendError::WriteBufferFull {
                id: self.id,
                needed: data.len(),
                available,
            });
        }

        self.write_buf[self.write_len..self.write_len + data.len()].copy_from_slice(data);
        self.write_len += data.len();

        self.handle_write_event()?;
        Ok(())
    }

    /// Shuts the stream down and marks the connection closed. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.fire_close_callback();
        if let Err(e) = self.stream.close_transport() {
            trace!(conn_id = %self.id, error = %e, "shutdown failed");
        }
        self.state = ConnectionState::Closed;
    }

    fn begin_closing(&mut self) {
        if self.state == ConnectionState::Active {
            self.state = ConnectionState::Closing;
            self.fire_close_callback();
        }
    }

    fn fire_close_callback(&mut self) {
        if let Some(callback) = self.on_close.take() {
            callback(self.id);
        }
    }

    /// Called once when the connection stops being active.
    pub fn set_close_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(ConnectionId) + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
    }

    /// Received bytes not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.read_buf[..self.read_len]
    }

    /// Drops the first `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.read_len);
        self.read_buf.copy_within(n..self.read_len, 0);
        self.read_len -= n;
    }

    pub fn read_buffer_full(&self) -> bool {
        self.read_len == self.read_buf.len()
    }

    pub fn read_capacity(&self) -> usize {
        self.read_buf.len()
    }

    pub fn write_capacity(&self) -> usize {
        self.write_buf.len()
    }

    pub fn pending_write(&self) -> usize {
        self.write_len
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            id: self.id,
            peer_addr: self.peer_addr,
            state: self.state,
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            buffered: self.read_len,
            pending_write: self.write_len,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S> fmt::Debug for ConnectionHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("buffered", &self.read_len)
            .field("pending_write", &self.write_len)
            .finish()
    }
}
