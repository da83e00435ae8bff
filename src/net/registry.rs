//! Thread-safe map of live connections.
//!
//! ```text
//! ConnectionRegistry
//!   Mutex<HashMap<ConnectionId, ConnectionHandler>>
//!        │
//!        ├──> ConnectionId(2) ──> ConnectionHandler { stream, buffers, counters }
//!        ├──> ConnectionId(3) ──> ConnectionHandler { ... }
//!        └──> ConnectionId(N) ──> ConnectionHandler { ... }
//! ```
//!
//! The event loop and application threads share one registry. Every operation
//! holds the lock for its whole duration, so a send never interleaves with a
//! read on the same connection. Callers must not re-enter the registry from
//! inside [`ConnectionRegistry::with`] or [`ConnectionRegistry::for_each`].
//!
//! Operations that mutate the map or run caller code report a poisoned lock as
//! [`NetworkError::PoisonedLock`]. Read-only queries recover the guard.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use mio::net::TcpStream;

use crate::net::{
    connection::{ConnectionHandler, ConnectionStats, Transport},
    ConnectionId, NetworkError, SendError,
};

type ConnectionMap<S> = HashMap<ConnectionId, ConnectionHandler<S>>;

/// Outcome of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, SendError)>,
}

pub struct ConnectionRegistry<S = TcpStream> {
    connections: Mutex<ConnectionMap<S>>,
    // byte counters of connections already removed
    retired_received: AtomicU64,
    retired_sent: AtomicU64,
}

impl<S: Transport> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            retired_received: AtomicU64::new(0),
            retired_sent: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ConnectionMap<S>>, NetworkError> {
        self.connections
            .lock()
            .map_err(|_| NetworkError::PoisonedLock("connection registry".to_string()))
    }

    fn lock_recovered(&self) -> MutexGuard<'_, ConnectionMap<S>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, conn: &ConnectionHandler<S>) {
        self.retired_received
            .fetch_add(conn.bytes_received(), Ordering::Relaxed);
        self.retired_sent
            .fetch_add(conn.bytes_sent(), Ordering::Relaxed);
    }

    pub fn add(&self, conn: ConnectionHandler<S>) -> Result<(), NetworkError> {
        let mut map = self.lock()?;
        let id = conn.id();
        if map.contains_key(&id) {
            return Err(NetworkError::DuplicateConnection(id));
        }
        map.insert(id, conn);
        Ok(())
    }

    /// Removes and returns the connection. The caller closes it.
    pub fn remove(&self, id: ConnectionId) -> Result<Option<ConnectionHandler<S>>, NetworkError> {
        let removed = self.lock()?.remove(&id);
        if let Some(conn) = &removed {
            self.retire(conn);
        }
        Ok(removed)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock_recovered().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock_recovered().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_recovered().is_empty()
    }

    /// Ids of all live connections, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock_recovered().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs `f` on one connection with the registry locked.
    ///
    /// `Ok(None)` when no connection has that id.
    pub fn with<R, F>(&self, id: ConnectionId, f: F) -> Result<Option<R>, NetworkError>
    where
        F: FnOnce(&mut ConnectionHandler<S>) -> R,
    {
        let mut map = self.lock()?;
        Ok(map.get_mut(&id).map(f))
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<(), NetworkError>
    where
        F: FnMut(&mut ConnectionHandler<S>),
    {
        let mut map = self.lock()?;
        map.values_mut().for_each(|conn| f(conn));
        Ok(())
    }

    /// Empties the registry, handing every connection back to the caller.
    pub fn drain(&self) -> Vec<ConnectionHandler<S>> {
        let drained: Vec<_> = self.lock_recovered().drain().map(|(_, conn)| conn).collect();
        drained.iter().for_each(|conn| self.retire(conn));
        drained
    }

    /// Closes and removes every connection. Returns how many were closed.
    pub fn close_all(&self) -> Result<usize, NetworkError> {
        let drained: Vec<_> = self.lock()?.drain().map(|(_, conn)| conn).collect();
        let count = drained.len();
        for mut conn in drained {
            conn.close();
            self.retire(&conn);
        }
        Ok(count)
    }

    pub fn send_to(&self, id: ConnectionId, data: &[u8]) -> Result<(), SendError> {
        let mut map = self.connections.lock().map_err(|_| SendError::PoisonedLock)?;
        match map.get_mut(&id) {
            Some(conn) => conn.send(data),
            None => Err(SendError::UnknownConnection(id)),
        }
    }

    /// Queues `data` on every active connection.
    ///
    /// One connection failing does not stop delivery to the others.
    pub fn broadcast(&self, data: &[u8]) -> Result<BroadcastReport, NetworkError> {
        let mut map = self.lock()?;
        let mut report = BroadcastReport::default();
        for (id, conn) in map.iter_mut() {
            if !conn.is_active() {
                continue;
            }
            match conn.send(data) {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failed.push((*id, e)),
            }
        }
        Ok(report)
    }

    pub fn stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        self.lock_recovered().get(&id).map(ConnectionHandler::stats)
    }

    /// Bytes received over the registry's lifetime, removed connections included.
    pub fn total_bytes_received(&self) -> u64 {
        let live: u64 = self
            .lock_recovered()
            .values()
            .map(ConnectionHandler::bytes_received)
            .sum();
        live + self.retired_received.load(Ordering::Relaxed)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        let live: u64 = self
            .lock_recovered()
            .values()
            .map(ConnectionHandler::bytes_sent)
            .sum();
        live + self.retired_sent.load(Ordering::Relaxed)
    }
}

impl<S: Transport> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for ConnectionRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .connections
            .lock()
            .map(|map| map.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len());
        f.debug_struct("ConnectionRegistry")
            .field("connections", &len)
            .finish()
    }
}
