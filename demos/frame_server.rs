//! Frame server answering the five built-in message types.
//!
//! ```text
//! cargo run --example frame_server -- 127.0.0.1 9000
//! RUST_LOG=msgloop=debug cargo run --example frame_server
//! ```
//!
//! - Ping   → Pong carrying the server's receive time
//! - Echo   → the same Echo back
//! - Data   → checksum computed on the worker pool, answered with a Status
//! - Status → logged; a status code of 255 shuts the server down

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context as _;
use msgloop::{
    dispatch::DispatchTable,
    net::{EventServer, ServerConfig},
    protocol::{
        crc32, DataMessage, EchoMessage, FrameFlags, PingMessage, PongMessage, StatusMessage,
    },
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_STATUS: u8 = 255;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

fn build_dispatch(pings: Arc<AtomicU64>) -> anyhow::Result<Arc<DispatchTable>> {
    let dispatch = Arc::new(DispatchTable::new());

    dispatch.register(move |ping: &PingMessage, origin| {
        pings.fetch_add(1, Ordering::Relaxed);
        origin.reply(&PongMessage::reply_to(ping, now_micros()))
    })?;

    dispatch.register(|echo: &EchoMessage, origin| origin.reply(echo))?;

    dispatch.register(|data: &DataMessage, origin| {
        let context = origin.context().cloned().ok_or("data frame without a server")?;
        let id = origin.connection_id().ok_or("data frame without a connection")?;
        let data = data.clone();

        context.clone().execute(move || {
            let checksum = crc32::checksum(data.data());
            let reply = StatusMessage::new(0, data.data_id, &format!("{checksum:08x}"));
            if let Err(e) = context.send_frame(id, &reply, FrameFlags::empty()) {
                tracing::warn!(conn_id = %id, error = %e, "failed to answer data frame");
            }
        })?;
        Ok(())
    })?;

    dispatch.register(|status: &StatusMessage, origin| {
        info!(
            conn_id = ?origin.connection_id(),
            code = status.status_code,
            error = status.error_code,
            message = status.message(),
            "status received"
        );
        if status.status_code == SHUTDOWN_STATUS {
            if let Some(context) = origin.context() {
                context.stop();
            }
        }
        Ok(())
    })?;

    Ok(dispatch)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("msgloop=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = match args.next() {
        Some(port) => port.parse().context("port must be a number")?,
        None => 9000,
    };

    let pings = Arc::new(AtomicU64::new(0));
    let dispatch = build_dispatch(Arc::clone(&pings))?;

    let config = ServerConfig::builder()
        .max_connections(256)
        .worker_threads(4)
        .build();

    let mut server = EventServer::new(config, dispatch).context("failed to create server")?;
    server
        .start(&address, port)
        .with_context(|| format!("failed to listen on {address}:{port}"))?;

    info!(addr = ?server.local_addr(), "send a Status frame with code 255 to stop");
    server.run(Some(Duration::from_millis(250)))?;

    info!(
        pings = pings.load(Ordering::Relaxed),
        received = server.total_bytes_received(),
        sent = server.total_bytes_sent(),
        "bye"
    );
    Ok(())
}
