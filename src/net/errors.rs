use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{net::ConnectionId, protocol::FrameError, thread_pool::PoolError};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("accept error: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("lock poisoned: {0}")]
    PoisonedLock(String),

    #[error("max connections reached, rejecting {0}")]
    MaxConnectionsReached(SocketAddr),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Why bytes could not be queued on a connection.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no connection with id {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} is not active")]
    NotActive(ConnectionId),

    /// Nothing was queued; the connection keeps its earlier pending bytes.
    #[error("write buffer of connection {id} is full: {needed} bytes needed, {available} free")]
    WriteBufferFull {
        id: ConnectionId,
        needed: usize,
        available: usize,
    },

    #[error("refusing to send an empty buffer")]
    Empty,

    #[error("failed to frame message: {0}")]
    Frame(#[from] FrameError),

    #[error("connection registry lock poisoned")]
    PoisonedLock,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
