//! Readiness-driven TCP serving of framed messages.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │  ┌──────────────┐          ┌─────────────────┐              │
//! │  │ EventServer  │          │ DispatchTable   │              │
//! │  │ ServerContext│◀────────│ (per-type       │              │
//! │  └──────────────┘  reply   │  callbacks)     │              │
//! └────────────┬───────────────┴────────▲────────┴──────────────┘
//!              │ start / run / stop      │ dispatch_from(origin, tag, payload)
//!              ▼                         │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Event loop                           │
//! │  ┌──────────┐     ┌────────────────────┐   ┌─────────────┐  │
//! │  │PollHandle│───▶│ ConnectionRegistry │   │ WorkerPool  │  │
//! │  │ + Waker  │     │ ConnectionHandler  │   │ (offload)   │  │
//! │  └──────────┘     └────────────────────┘   └─────────────┘  │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ OS Events
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Operating System (epoll/kqueue/IOCP)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! One thread runs [`EventServer::run`]. Each readable connection is read
//! until the socket would block or its per-event budget runs out, in which case
//! it is serviced again before the next blocking poll. Complete frames are cut
//! out of the read buffer and, once the registry lock is released, handed to the
//! [`DispatchTable`](crate::dispatch::DispatchTable). Callbacks receive an
//! [`Origin`](crate::dispatch::Origin) through which they can reply, broadcast,
//! close connections or push slow work onto the server's worker pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, thread, time::Duration};
//! use msgloop::{
//!     dispatch::DispatchTable,
//!     net::{EventServer, ServerConfig},
//!     protocol::{PingMessage, PongMessage},
//! };
//!
//! let dispatch = Arc::new(DispatchTable::new());
//! dispatch
//!     .register(|ping: &PingMessage, origin| origin.reply(&PongMessage::reply_to(ping, 0)))
//!     .unwrap();
//!
//! let mut server = EventServer::new(ServerConfig::default(), dispatch).unwrap();
//! server.start("127.0.0.1", 0).unwrap();
//! let context = server.context();
//!
//! let handle = thread::spawn(move || server.run(Some(Duration::from_millis(50))));
//! // ...
//! context.stop();
//! handle.join().unwrap().unwrap();
//! ```

pub mod config;
pub mod connection;
pub mod errors;
pub mod event;
pub mod poll;
pub mod registry;
pub mod server;
pub mod subsystem;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BackpressurePolicy, ServerConfig, ServerConfigBuilder, ViolationPolicy};
pub use connection::{ConnectionHandler, ConnectionId, ConnectionState, ConnectionStats, Transport};
pub use errors::{NetworkError, SendError};
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use server::{EventServer, ServerContext, ServerState};
