//! Configuration for [`super::ConnectionPool`].

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use super::backoff::BackoffConfig;
use crate::reason::DisconnectReason;

/// Callback fired after a connection is registered, with its address and
/// whether this process dialed it.
pub type ConnectCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Callback fired once after a connection is torn down.
pub type DisconnectCallback = Arc<dyn Fn(&str, &DisconnectReason) + Send + Sync>;

/// Default port for the listening socket.
pub const DEFAULT_PORT: u16 = 8333;

/// Settings shared by every connection in a pool.
///
/// Built with consuming setters starting from [`PoolConfig::default`]:
///
/// ```
/// use std::time::Duration;
///
/// use peerwire::PoolConfig;
///
/// let config = PoolConfig::default()
///     .listen_addr(([127, 0, 0, 1], 0).into())
///     .max_connections(8)
///     .read_timeout(Duration::from_secs(30))
///     .on_disconnect(|addr, reason| eprintln!("{addr} dropped: {reason}"));
/// assert_eq!(config.max_connections_limit(), 8);
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) listen_addr: SocketAddr,
    pub(crate) max_connections: usize,
    pub(crate) max_message_length: usize,
    pub(crate) dial_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) send_result_buffer: usize,
    pub(crate) queue_size: usize,
    pub(crate) broadcast_grace: Duration,
    pub(crate) backoff: BackoffConfig,
    pub(crate) debug: bool,
    pub(crate) on_connect: Option<ConnectCallback>,
    pub(crate) on_disconnect: Option<DisconnectCallback>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 125,
            max_message_length: 32 * 1024 * 1024,
            dial_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
            send_result_buffer: 100,
            queue_size: 100,
            broadcast_grace: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
            debug: false,
            on_connect: None,
            on_disconnect: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("listen_addr", &self.listen_addr)
            .field("max_connections", &self.max_connections)
            .field("max_message_length", &self.max_message_length)
            .field("dial_timeout", &self.dial_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("send_result_buffer", &self.send_result_buffer)
            .field("queue_size", &self.queue_size)
            .field("broadcast_grace", &self.broadcast_grace)
            .field("backoff", &self.backoff)
            .field("debug", &self.debug)
            .field("on_connect", &self.on_connect.as_ref().map(|_| "Some(<callback>)"))
            .field(
                "on_disconnect",
                &self.on_disconnect.as_ref().map(|_| "Some(<callback>)"),
            )
            .finish()
    }
}

impl PoolConfig {
    /// Address the listening socket binds to.
    #[must_use]
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Largest number of simultaneous connections, inbound and dialed combined.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Largest frame length a peer may declare. Values below 4 are raised to 4.
    #[must_use]
    pub fn max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max.max(crate::codec::MIN_FRAME_LENGTH);
        self
    }

    /// Time allowed for an outbound dial to complete.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Time a connection may go without receiving bytes before it is dropped.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Time allowed for a single frame write.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Capacity of the completed-send result queue.
    #[must_use]
    pub fn send_result_buffer(mut self, size: usize) -> Self {
        self.send_result_buffer = size.max(1);
        self
    }

    /// Capacity of each connection's outbound queue.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// How long a broadcast waits on a full queue before giving up on it.
    #[must_use]
    pub fn broadcast_grace(mut self, grace: Duration) -> Self {
        self.broadcast_grace = grace;
        self
    }

    /// Back-off applied when accepting a socket fails.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Log every frame sent and received at debug level.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Register a callback fired after each connection is registered.
    #[must_use]
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Register a callback fired once after each connection is torn down.
    #[must_use]
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Configured listen address.
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr { self.listen_addr }

    /// Configured connection limit.
    #[must_use]
    pub const fn max_connections_limit(&self) -> usize { self.max_connections }

    /// Configured frame length limit.
    #[must_use]
    pub const fn max_message_len(&self) -> usize { self.max_message_length }

    /// Configured broadcast grace period.
    #[must_use]
    pub const fn broadcast_grace_period(&self) -> Duration { self.broadcast_grace }
}
