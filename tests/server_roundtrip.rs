//! End-to-end tests over loopback TCP.

use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener as StdListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use msgloop::{
    dispatch::DispatchTable,
    net::{
        ConnectionId, EventServer, NetworkError, SendError, ServerConfig, ServerContext,
        ServerState, ViolationPolicy,
    },
    protocol::{
        deserialize_frame, encode_frame, DataMessage, EchoMessage, FrameFlags, FrameHeader,
        Payload, PingMessage, PongMessage, StatusMessage,
    },
};

const POLL: Option<Duration> = Some(Duration::from_millis(20));

struct Running {
    addr: SocketAddr,
    context: ServerContext,
    handle: JoinHandle<Result<(), NetworkError>>,
}

impl Running {
    fn stop(self) -> ServerContext {
        self.context.stop();
        self.handle.join().unwrap().unwrap();
        self.context
    }
}

fn spawn_server(config: ServerConfig, dispatch: Arc<DispatchTable>) -> Running {
    let mut server = EventServer::new(config, dispatch).unwrap();
    server.start("127.0.0.1", 0).unwrap();
    let addr = server.local_addr().unwrap();
    let context = server.context();
    let handle = thread::spawn(move || server.run(POLL));
    Running {
        addr,
        context,
        handle,
    }
}

fn echo_dispatch() -> Arc<DispatchTable> {
    let dispatch = Arc::new(DispatchTable::new());
    dispatch
        .register(|echo: &EchoMessage, origin| origin.reply(echo))
        .unwrap();
    dispatch
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Reads one whole frame and returns its type tag and payload.
fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; FrameHeader::SIZE];
    stream.read_exact(&mut header).unwrap();
    let len = u16::from_le_bytes([header[4], header[5]]) as usize;

    let mut frame = header.to_vec();
    frame.resize(FrameHeader::SIZE + len + 4, 0);
    stream.read_exact(&mut frame[FrameHeader::SIZE..]).unwrap();

    let (parsed, consumed) = deserialize_frame(&frame).unwrap().unwrap();
    assert_eq!(consumed, frame.len());
    (parsed.header.message_type(), parsed.payload.to_vec())
}

fn read_message<P: Payload>(stream: &mut TcpStream) -> P {
    let (tag, payload) = read_frame(stream);
    assert_eq!(tag, P::TYPE as u8);
    P::decode(&payload).unwrap()
}

/// True once the peer has closed the connection.
fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return true,
            Err(_) => return false,
        }
    }
}

fn echo_frame(text: &[u8]) -> Vec<u8> {
    EchoMessage::new(text.to_vec())
        .unwrap()
        .to_frame(FrameFlags::empty())
        .unwrap()
        .to_vec()
}

#[test]
fn back_to_back_frames_in_one_write() {
    let server = spawn_server(ServerConfig::default(), echo_dispatch());
    let mut client = connect(server.addr);

    let mut bytes = echo_frame(b"first");
    bytes.extend(echo_frame(b"second"));
    client.write_all(&bytes).unwrap();

    let first: EchoMessage = read_message(&mut client);
    let second: EchoMessage = read_message(&mut client);
    assert_eq!(first.data(), b"first");
    assert_eq!(second.data(), b"second");

    let context = server.stop();
    assert!(context.total_bytes_received() >= bytes.len() as u64);
    assert_eq!(context.total_bytes_sent(), bytes.len() as u64);
}

#[test]
fn split_header_completes_on_next_read() {
    let server = spawn_server(ServerConfig::default(), echo_dispatch());
    let mut client = connect(server.addr);
    client.set_nodelay(true).unwrap();

    let bytes = echo_frame(b"patience");
    client.write_all(&bytes[..5]).unwrap();
    thread::sleep(Duration::from_millis(50));
    client.write_all(&bytes[5..]).unwrap();

    let echo: EchoMessage = read_message(&mut client);
    assert_eq!(echo.data(), b"patience");
    server.stop();
}

#[test]
fn ping_gets_pong() {
    let dispatch = Arc::new(DispatchTable::new());
    dispatch
        .register(|ping: &PingMessage, origin| {
            origin.reply(&PongMessage::reply_to(ping, ping.timestamp + 1))
        })
        .unwrap();
    let server = spawn_server(ServerConfig::default(), dispatch);
    let mut client = connect(server.addr);

    let ping = PingMessage {
        sequence_id: 17,
        timestamp: 1_000,
    };
    client
        .write_all(&ping.to_frame(FrameFlags::ACK_REQUIRED).unwrap())
        .unwrap();

    let pong: PongMessage = read_message(&mut client);
    assert_eq!(pong.sequence_id, 17);
    assert_eq!(pong.timestamp, 1_000);
    assert_eq!(pong.echo_time, 1_001);
    server.stop();
}

#[test]
fn corrupt_frame_dropped_connection_kept() {
    let server = spawn_server(ServerConfig::default(), echo_dispatch());
    let mut client = connect(server.addr);

    let mut corrupt = echo_frame(b"broken");
    corrupt[FrameHeader::SIZE + 3] ^= 0x55;
    let mut bytes = corrupt;
    bytes.extend(echo_frame(b"intact"));
    client.write_all(&bytes).unwrap();

    let echo: EchoMessage = read_message(&mut client);
    assert_eq!(echo.data(), b"intact");
    assert_eq!(server.context.connection_count(), 1);
    server.stop();
}

#[test]
fn corrupt_frame_disconnects_under_strict_policy() {
    let config = ServerConfig::builder()
        .violation_policy(ViolationPolicy::Disconnect)
        .build();
    let server = spawn_server(config, echo_dispatch());
    let mut client = connect(server.addr);

    let mut corrupt = echo_frame(b"broken");
    corrupt[FrameHeader::SIZE + 3] ^= 0x55;
    client.write_all(&corrupt).unwrap();

    assert!(closed_by_peer(&mut client));
    wait_until(|| server.context.connection_count() == 0);
    server.stop();
}

#[test]
fn unknown_message_type_is_a_violation_under_strict_policy() {
    let config = ServerConfig::builder()
        .violation_policy(ViolationPolicy::Disconnect)
        .build();
    let server = spawn_server(config, echo_dispatch());
    let mut client = connect(server.addr);

    client
        .write_all(&encode_frame(0x42u8, FrameFlags::empty(), b"??").unwrap())
        .unwrap();
    assert!(closed_by_peer(&mut client));
    server.stop();
}

#[test]
fn broadcast_reaches_every_client() {
    let server = spawn_server(ServerConfig::default(), Arc::new(DispatchTable::new()));
    let mut a = connect(server.addr);
    let mut b = connect(server.addr);
    wait_until(|| server.context.connection_count() == 2);

    let status = StatusMessage::new(0, 0, "maintenance in 5 minutes");
    let delivered = server
        .context
        .broadcast_frame(&status, FrameFlags::empty())
        .unwrap();
    assert_eq!(delivered, 2);

    for client in [&mut a, &mut b] {
        let received: StatusMessage = read_message(client);
        assert_eq!(received.message(), "maintenance in 5 minutes");
    }
    server.stop();
}

#[test]
fn connections_beyond_limit_are_dropped() {
    let config = ServerConfig::builder().max_connections(1).build();
    let server = spawn_server(config, echo_dispatch());

    let mut first = connect(server.addr);
    wait_until(|| server.context.connection_count() == 1);

    let mut second = connect(server.addr);
    assert!(closed_by_peer(&mut second));
    assert_eq!(server.context.connection_count(), 1);

    first.write_all(&echo_frame(b"still here")).unwrap();
    let echo: EchoMessage = read_message(&mut first);
    assert_eq!(echo.data(), b"still here");
    server.stop();
}

#[test]
fn stop_closes_connections() {
    let server = spawn_server(ServerConfig::default(), echo_dispatch());
    let mut client = connect(server.addr);
    wait_until(|| server.context.connection_count() == 1);

    let context = server.stop();
    assert_eq!(context.state(), ServerState::Stopped);
    assert_eq!(context.connection_count(), 0);
    assert!(context.local_addr().is_none());
    assert!(closed_by_peer(&mut client));
}

#[test]
fn handler_can_stop_the_server() {
    let dispatch = Arc::new(DispatchTable::new());
    dispatch
        .register(|_: &StatusMessage, origin| {
            if let Some(context) = origin.context() {
                context.stop();
            }
            Ok(())
        })
        .unwrap();
    let server = spawn_server(ServerConfig::default(), dispatch);
    let mut client = connect(server.addr);

    client
        .write_all(
            &StatusMessage::new(1, 0, "shutdown")
                .to_frame(FrameFlags::empty())
                .unwrap(),
        )
        .unwrap();

    server.handle.join().unwrap().unwrap();
    assert_eq!(server.context.state(), ServerState::Stopped);
}

#[test]
fn bind_failure_leaves_server_stopped() {
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut server = EventServer::new(ServerConfig::default(), echo_dispatch()).unwrap();
    let err = server.start("127.0.0.1", port).unwrap_err();
    assert!(matches!(err, NetworkError::Bind { .. }));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[test]
fn start_twice_is_rejected() {
    let mut server = EventServer::new(ServerConfig::default(), echo_dispatch()).unwrap();
    server.start("127.0.0.1", 0).unwrap();
    assert!(matches!(
        server.start("127.0.0.1", 0),
        Err(NetworkError::InvalidState(_))
    ));
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn run_without_start_returns_immediately() {
    let mut server = EventServer::new(ServerConfig::default(), echo_dispatch()).unwrap();
    let started = Instant::now();
    server.run(None).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn send_to_unknown_connection_fails() {
    let server = spawn_server(ServerConfig::default(), echo_dispatch());
    let err = server
        .context
        .send_to(ConnectionId::new(12_345), b"hello")
        .unwrap_err();
    assert!(matches!(err, SendError::UnknownConnection(_)));
    server.stop();
}

#[test]
fn send_to_connection_by_id() {
    let server = spawn_server(ServerConfig::default(), Arc::new(DispatchTable::new()));
    let mut client = connect(server.addr);
    wait_until(|| server.context.connection_count() == 1);

    let id = server.context.connection_ids()[0];
    let stats = server.context.connection_stats(id).unwrap();
    assert!(stats.peer_addr.ip().is_loopback());

    server
        .context
        .send_frame(id, &StatusMessage::new(2, 7, "hi"), FrameFlags::empty())
        .unwrap();
    let status: StatusMessage = read_message(&mut client);
    assert_eq!(status.status_code, 2);
    assert_eq!(status.error_code, 7);

    assert!(server.context.close_connection(id));
    assert!(closed_by_peer(&mut client));
    server.stop();
}

#[test]
fn data_processed_on_worker_pool() {
    let dispatch = Arc::new(DispatchTable::new());
    let worker_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&worker_hits);
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);

    dispatch
        .register(move |data: &DataMessage, origin| {
            let context = origin.context().cloned().ok_or("detached origin")?;
            let id = origin.connection_id().ok_or("detached origin")?;
            let bytes = data.data().to_vec();
            let data_id = data.data_id;
            let hits = Arc::clone(&hits);
            let tx = tx.lock().unwrap().clone();

            context.clone().execute(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
                let _ = tx.send(thread::current().name().map(str::to_owned));
                let reply = StatusMessage::new(0, data_id, &sum.to_string());
                let _ = context.send_frame(id, &reply, FrameFlags::empty());
            })?;
            Ok(())
        })
        .unwrap();

    let config = ServerConfig::builder().worker_threads(2).build();
    let server = spawn_server(config, dispatch);
    let mut client = connect(server.addr);

    let data = DataMessage::new(3, 99, vec![1u8, 2, 3, 4]).unwrap();
    client
        .write_all(&data.to_frame(FrameFlags::empty()).unwrap())
        .unwrap();

    let status: StatusMessage = read_message(&mut client);
    assert_eq!(status.error_code, 99);
    assert_eq!(status.message(), "10");
    assert_eq!(worker_hits.load(Ordering::SeqCst), 1);

    let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(worker.unwrap_or_default().starts_with("msgloop-worker-"));
    server.stop();
}

#[test]
fn frames_from_one_connection_dispatch_in_order() {
    let dispatch = Arc::new(DispatchTable::new());
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    dispatch
        .register(move |ping: &PingMessage, _| {
            tx.lock().unwrap().send(ping.sequence_id)?;
            Ok(())
        })
        .unwrap();
    let server = spawn_server(ServerConfig::default(), dispatch);
    let mut client = connect(server.addr);

    // enough frames to span several event-loop passes
    let mut bytes = Vec::new();
    for sequence_id in 0..1000 {
        let ping = PingMessage {
            sequence_id,
            timestamp: 0,
        };
        bytes.extend_from_slice(&ping.to_frame(FrameFlags::empty()).unwrap());
    }
    client.write_all(&bytes).unwrap();

    let received: Vec<u32> = (0..1000)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(received, (0..1000).collect::<Vec<_>>());
    server.stop();
}
