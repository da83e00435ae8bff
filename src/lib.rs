//! # msgloop
//! A readiness-driven binary message server for Rust, built directly on [`mio`]
//! without an async runtime.
//!
//! msgloop accepts TCP connections on a single event-loop thread, cuts the
//! incoming byte streams into checksummed frames, decodes them into typed
//! messages and routes each one to the callback registered for its type.
//! Slow work can be pushed onto a fixed worker pool; a lock-free bounded ring
//! queue is available for handing values between threads.
//! ## Features
//! - **Runtime-agnostic**: no Tokio, no async/await; one poll loop per server
//! - **Cross-platform**: mio's polling abstraction (epoll, kqueue, IOCP)
//! - **Zero-copy headers**: frame headers are viewed in place with `zerocopy`
//! - **Typed dispatch**: one decoder + callback per message type
//! - **Worker pool**: condition-variable parked threads, panic isolation
//! - **Lock-free queue**: bounded multi-producer multi-consumer ring
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌───────────────┐
//! │ EventServer │───▶│  PollHandle  │    │ DispatchTable │
//! └─────────────┘    └──────────────┘    └───────────────┘
//!        │                                       ▲
//!        ▼                                       │ frames
//! ┌──────────────────┐    ┌─────────────┐        │
//! │ConnectionRegistry│───▶│ FrameCodec  │───────┘
//! └──────────────────┘    └─────────────┘
//!        │
//!        ▼
//! ┌──────────────┐    ┌─────────────┐
//! │ WorkerPool   │───▶│   Workers   │
//! └──────────────┘    └─────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use msgloop::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatch = Arc::new(DispatchTable::new());
//!     dispatch.register(|echo: &EchoMessage, origin| origin.reply(echo))?;
//!
//!     let mut server = EventServer::new(ServerConfig::default(), dispatch)?;
//!     server.start("127.0.0.1", 9000)?;
//!
//!     // Blocks until a ServerContext asks it to stop
//!     server.run(Some(Duration::from_millis(100)))?;
//!     Ok(())
//! }
//! ```
//!
//! - [`net`]: event loop, connections, registry and server configuration
//! - [`protocol`]: wire format, frame codec and typed messages
//! - [`dispatch`]: message-type to callback routing
//! - [`thread_pool`]: fixed worker pool with task handles
//! - [`ring_queue`]: lock-free bounded MPMC queue
//! - [`error`]: boxed error alias used by callbacks

pub mod dispatch;
pub mod error;
pub mod net;
pub mod protocol;
pub mod ring_queue;
pub mod thread_pool;
pub mod utils;

pub use dispatch::{DispatchError, DispatchTable, HandlerResult, Origin};
pub use net::{EventServer, NetworkError, SendError, ServerConfig, ServerContext};
pub use ring_queue::BoundedRingQueue;
pub use thread_pool::{PoolError, TaskHandle, WorkerPool};

/// Commonly used types and traits.
///
/// ```rust
/// use msgloop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::dispatch::{DispatchTable, HandlerResult, Origin};
    pub use crate::net::{
        BackpressurePolicy, ConnectionId, EventServer, ServerConfig, ServerContext,
        ViolationPolicy,
    };
    pub use crate::protocol::{
        DataMessage, EchoMessage, FrameFlags, MessageType, Payload, PingMessage, PongMessage,
        StatusMessage,
    };
    pub use crate::ring_queue::BoundedRingQueue;
    pub use crate::thread_pool::{TaskHandle, WorkerPool};
}
