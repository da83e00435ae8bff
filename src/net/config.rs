use crate::{net::NetworkError, protocol::MAX_FRAME_SIZE};

/// What the server does with a connection that sends a malformed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Discard the offending bytes, log, keep the connection.
    #[default]
    DropFrame,
    /// Close the connection after dispatching the frames that preceded it.
    Disconnect,
}

/// What the server does when a send would overflow a connection's write buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Fail the send, keep the connection.
    #[default]
    Reject,
    /// Fail the send and close the connection.
    Disconnect,
}

/// Configuration for [`EventServer`](crate::net::EventServer).
///
/// Use [`ServerConfig::builder()`] for ergonomic construction.
///
/// ## Buffers
///
/// - read_buffer_size: fixed per-connection receive buffer. Must hold at least
///   one maximum-size frame ([`MAX_FRAME_SIZE`]).
/// - write_buffer_size: fixed per-connection send buffer. A send that does not
///   fit is refused, see [`BackpressurePolicy`].
///
/// ## Resource Limits
///
/// - max_connections: sockets accepted beyond this are closed immediately
/// - worker_threads: size of the pool handlers can offload to (0 = one per core)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Readiness events fetched per poll
    pub events_capacity: usize,
    pub worker_threads: usize,
    /// Enable TCP_NODELAY on accepted sockets
    pub no_delay: bool,
    pub violation_policy: ViolationPolicy,
    pub backpressure_policy: BackpressurePolicy,
}

impl ServerConfig {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;
    pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;
    pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

    /// Create a new builder for ServerConfig
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.max_connections == 0 {
            return Err(NetworkError::Configuration(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        if self.events_capacity == 0 {
            return Err(NetworkError::Configuration(
                "events_capacity must be greater than zero".to_string(),
            ));
        }
        if self.write_buffer_size == 0 {
            return Err(NetworkError::Configuration(
                "write_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.read_buffer_size < MAX_FRAME_SIZE {
            return Err(NetworkError::Configuration(format!(
                "read_buffer_size {} cannot hold a maximum-size frame of {MAX_FRAME_SIZE} bytes",
                self.read_buffer_size
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            read_buffer_size: Self::DEFAULT_BUFFER_SIZE,
            write_buffer_size: Self::DEFAULT_BUFFER_SIZE,
            events_capacity: Self::DEFAULT_EVENTS_CAPACITY,
            worker_threads: 0,
            no_delay: true,
            violation_policy: ViolationPolicy::default(),
            backpressure_policy: BackpressurePolicy::default(),
        }
    }
}

/// Builder for ServerConfig.
///
/// Unset fields fall back to `ServerConfig::default()`.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    max_connections: Option<usize>,
    read_buffer_size: Option<usize>,
    write_buffer_size: Option<usize>,
    events_capacity: Option<usize>,
    worker_threads: Option<usize>,
    no_delay: Option<bool>,
    violation_policy: Option<ViolationPolicy>,
    backpressure_policy: Option<BackpressurePolicy>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size);
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = Some(size);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Worker pool size; 0 picks one thread per core.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.violation_policy = Some(policy);
        self
    }

    pub fn backpressure_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure_policy = Some(policy);
        self
    }

    /// Build the ServerConfig. Validation happens when the server is created.
    pub fn build(self) -> ServerConfig {
        let default = ServerConfig::default();
        ServerConfig {
            max_connections: self.max_connections.unwrap_or(default.max_connections),
            read_buffer_size: self.read_buffer_size.unwrap_or(default.read_buffer_size),
            write_buffer_size: self.write_buffer_size.unwrap_or(default.write_buffer_size),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            worker_threads: self.worker_threads.unwrap_or(default.worker_threads),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            violation_policy: self.violation_policy.unwrap_or(default.violation_policy),
            backpressure_policy: self
                .backpressure_policy
                .unwrap_or(default.backpressure_policy),
        }
    }
}
