//! Connection pool: accepting, dialing, routing and tearing down peers.
//!
//! [`ConnectionPool`] owns every live connection. Its two indexes (by
//! [`ConnectionId`] and by remote address) and the id counter live inside a
//! single-writer actor, the strand; every operation that reads or changes
//! them submits a closure to the strand and awaits the answer. Each
//! connection's socket, buffer and queue are owned by that connection's own
//! read and orchestrator tasks, so no lock protects pool state.
//!
//! Callbacks configured on [`PoolConfig`] always run outside the strand and
//! may call back into the pool.

mod accept;
mod backoff;
mod config;
mod error;
mod strand;
mod task;

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

pub use backoff::BackoffConfig;
pub use config::{ConnectCallback, DEFAULT_PORT, DisconnectCallback, PoolConfig};
pub use error::PoolError;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{
        self,
        error::{SendTimeoutError, TrySendError},
    },
    time::{Instant, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use self::strand::Strand;
use crate::{
    codec::CodecError,
    connection::{Connection, ConnectionId, ConnectionInfo, Outbound},
    message::Message,
    metrics,
    reason::DisconnectReason,
    registry::Registry,
};

/// Outcome of writing one queued message, published after the write.
///
/// Obtain the stream of results with [`ConnectionPool::take_send_results`].
pub struct SendResult<S> {
    /// Connection the message was queued on.
    pub connection_id: ConnectionId,
    /// Remote address of that connection.
    pub remote_addr: String,
    /// The message that was written, or failed to be.
    pub message: Outbound<S>,
    /// `Ok` once the frame was fully written.
    pub result: Result<(), PoolError>,
}

impl<S> fmt::Debug for SendResult<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendResult")
            .field("connection_id", &self.connection_id)
            .field("remote_addr", &self.remote_addr)
            .field("message", &self.message)
            .field("result", &self.result)
            .finish()
    }
}

/// A listening socket bound by [`ConnectionPool::bind`] but not yet serving.
#[derive(Debug)]
pub struct BoundListener {
    listener: TcpListener,
}

impl BoundListener {
    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> { self.listener.local_addr() }
}

struct Listening {
    token: CancellationToken,
    addr: Option<SocketAddr>,
}

/// State owned by the strand.
struct PoolState<S> {
    by_id: HashMap<ConnectionId, Connection<S>>,
    by_addr: HashMap<String, ConnectionId>,
    next_id: u64,
    listening: Option<Listening>,
    results: Option<mpsc::Receiver<SendResult<S>>>,
}

impl<S> PoolState<S> {
    fn new(results: mpsc::Receiver<SendResult<S>>) -> Self {
        Self {
            by_id: HashMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            listening: None,
            results: Some(results),
        }
    }

    fn check_admission(&self, remote_addr: &str, max: usize) -> Result<(), PoolError> {
        if self.by_addr.contains_key(remote_addr) {
            return Err(PoolError::DuplicateConnection(remote_addr.to_owned()));
        }
        if self.by_id.len() >= max {
            return Err(PoolError::PoolFull { max });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert into both indexes. Callers check admission first.
    fn insert(&mut self, record: Connection<S>) {
        self.by_addr.insert(record.remote_addr.clone(), record.id);
        self.by_id.insert(record.id, record);
    }

    fn get(&self, remote_addr: &str) -> Option<&Connection<S>> {
        self.by_addr
            .get(remote_addr)
            .and_then(|id| self.by_id.get(id))
    }

    fn remove_by_id(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        let record = self.by_id.remove(&id)?;
        self.by_addr.remove(&record.remote_addr);
        Some(record)
    }

    fn remove_by_addr(&mut self, remote_addr: &str) -> Option<Connection<S>> {
        let id = *self.by_addr.get(remote_addr)?;
        self.remove_by_id(id)
    }

    fn remove_where(&mut self, stale: impl Fn(&Connection<S>) -> bool) -> Vec<Connection<S>> {
        let ids: Vec<_> = self
            .by_id
            .values()
            .filter(|record| stale(record))
            .map(|record| record.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove_by_id(id))
            .collect()
    }

    fn drain(&mut self) -> Vec<Connection<S>> {
        self.by_addr.clear();
        let mut records: Vec<_> = self.by_id.drain().map(|(_, record)| record).collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.by_id.values().map(Connection::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

impl<S> Drop for PoolState<S> {
    fn drop(&mut self) {
        for record in self.by_id.values() {
            record.cancel.cancel();
        }
        if let Some(listening) = &self.listening {
            listening.token.cancel();
        }
    }
}

struct Inner<S> {
    config: PoolConfig,
    registry: Arc<Registry<S>>,
    state: Arc<S>,
    strand: Strand<PoolState<S>>,
    results: mpsc::Sender<SendResult<S>>,
    tracker: TaskTracker,
}

/// Set of live peer connections sharing one registry and application state.
///
/// Handles are cheap to clone and all refer to the same pool.
///
/// # Examples
///
/// ```no_run
/// use peerwire::{ConnectionPool, PoolConfig, Registry};
///
/// # async fn demo() -> Result<(), peerwire::pool::PoolError> {
/// let config = PoolConfig::default().listen_addr(([127, 0, 0, 1], 0).into());
/// let pool = ConnectionPool::new(config, Registry::<()>::new(), ())?;
/// let listener = pool.bind().await?;
/// println!("listening on {:?}", listener.local_addr());
/// tokio::spawn({
///     let pool = pool.clone();
///     async move { pool.serve(listener).await }
/// });
/// pool.connect("127.0.0.1:8333").await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl<S> ConnectionPool<S>
where
    S: Send + Sync + 'static,
{
    /// Create a pool over `registry`, delivering messages with `state`.
    ///
    /// The registry is verified here, so a wiring mistake fails start-up
    /// before any socket is opened. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Registry`] if a registered prefix is invalid.
    pub fn new(
        config: PoolConfig,
        registry: Registry<S>,
        state: impl Into<Arc<S>>,
    ) -> Result<Self, PoolError> {
        registry.verify()?;
        let (results_tx, results_rx) = mpsc::channel(config.send_result_buffer);
        let strand = Strand::spawn(PoolState::new(results_rx));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(registry),
                state: state.into(),
                strand,
                results: results_tx,
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig { &self.inner.config }

    /// Registry used to encode and decode messages.
    #[must_use]
    pub fn registry(&self) -> &Registry<S> { &self.inner.registry }

    /// Application state handed to every message handler.
    #[must_use]
    pub fn state(&self) -> &S { &self.inner.state }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(future);
    }

    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Bind`] if the address cannot be bound.
    pub async fn bind(&self) -> Result<BoundListener, PoolError> {
        let listener = TcpListener::bind(self.inner.config.listen_addr)
            .await
            .map_err(PoolError::Bind)?;
        Ok(BoundListener { listener })
    }

    /// Accept inbound connections on `listener` until [`Self::shutdown`].
    ///
    /// Accept failures are logged and retried with back-off; they never
    /// end the loop. Serving again replaces any listener already serving.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn serve(&self, listener: BoundListener) -> Result<(), PoolError> {
        let listener = Arc::new(listener.listener);
        let local_addr = listener.local_addr().ok();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let previous = self
            .inner
            .strand
            .run(move |state| {
                state.listening.replace(Listening {
                    token,
                    addr: local_addr,
                })
            })
            .await?;
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        info!("accepting connections: local_addr={local_addr:?}");
        accept::accept_loop(listener, self.clone(), shutdown, self.inner.config.backoff).await;
        Ok(())
    }

    /// Bind the configured address and serve until [`Self::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Bind`] if binding fails, or
    /// [`PoolError::Closed`] if the pool has been closed.
    pub async fn run(&self) -> Result<(), PoolError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Address the pool is currently accepting on, if it is serving.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn local_addr(&self) -> Result<Option<SocketAddr>, PoolError> {
        self.inner
            .strand
            .run(|state| state.listening.as_ref().and_then(|l| l.addr))
            .await
    }

    /// Dial `addr` and register the connection as solicited.
    ///
    /// Succeeds without dialing if a connection to `addr` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::DialTimeout`] or [`PoolError::Dial`] if the dial
    /// fails, [`PoolError::PoolFull`] at the connection limit, and
    /// [`PoolError::Closed`] if the pool has been closed.
    pub async fn connect(&self, addr: &str) -> Result<(), PoolError> {
        if self.is_conn_exist(addr).await? {
            return Ok(());
        }
        let dial_timeout = self.inner.config.dial_timeout;
        let stream = match timeout(dial_timeout, TcpStream::connect(addr)).await {
            Err(_) => {
                return Err(PoolError::DialTimeout {
                    addr: addr.to_owned(),
                    timeout: dial_timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(PoolError::Dial {
                    addr: addr.to_owned(),
                    source,
                });
            }
            Ok(Ok(stream)) => stream,
        };
        let remote_addr = stream
            .peer_addr()
            .map_or_else(|_| addr.to_owned(), |peer| peer.to_string());
        match self.handle_connection(stream, remote_addr, true).await {
            Ok(_) | Err(PoolError::DuplicateConnection(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Register `stream` and start its tasks.
    ///
    /// The socket is dropped, closing it, if registration is refused.
    pub(crate) async fn handle_connection(
        &self,
        stream: TcpStream,
        remote_addr: String,
        solicited: bool,
    ) -> Result<ConnectionId, PoolError> {
        let max = self.inner.config.max_connections;
        let queue_size = self.inner.config.queue_size;
        let io = self
            .inner
            .strand
            .run(move |state| {
                state.check_admission(&remote_addr, max)?;
                let id = state.allocate_id();
                let (record, io) = Connection::open(id, remote_addr, solicited, stream, queue_size);
                state.insert(record);
                Ok::<_, PoolError>(io)
            })
            .await??;
        let id = io.id;
        metrics::inc_connections();
        info!(
            "connection registered: connection_id={id}, remote_addr={}, solicited={solicited}",
            io.remote_addr
        );
        if let Some(callback) = &self.inner.config.on_connect {
            callback(&io.remote_addr, solicited);
        }
        task::spawn_connection(self, io);
        Ok(id)
    }

    /// Queue `message` for the connection to `addr` without waiting.
    ///
    /// A full queue is reported to the caller; the connection stays up.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Codec`] if the message type is not registered.
    /// - [`PoolError::NotConnected`] if no connection to `addr` exists.
    /// - [`PoolError::WriteQueueFull`] if the outbound queue is full.
    /// - [`PoolError::Closed`] if the pool has been closed.
    pub async fn send_message<M: Message<S>>(&self, addr: &str, message: M) -> Result<(), PoolError> {
        self.ensure_registered(&message)?;
        let key = addr.to_owned();
        let sender = self
            .inner
            .strand
            .run(move |state| state.get(&key).map(|record| record.outbound.clone()))
            .await?
            .ok_or_else(|| PoolError::NotConnected(addr.to_owned()))?;
        let message: Outbound<S> = Arc::new(message);
        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::inc_write_queue_full();
                Err(PoolError::WriteQueueFull(addr.to_owned()))
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::NotConnected(addr.to_owned())),
        }
    }

    /// Queue `message` on every connection, returning how many accepted it.
    ///
    /// Each queue may take up to the configured broadcast grace period to
    /// make room. Connections still full after that are disconnected with
    /// [`DisconnectReason::WriteQueueFull`].
    ///
    /// # Errors
    ///
    /// - [`PoolError::Codec`] if the message type is not registered.
    /// - [`PoolError::NoAvailableConnection`] if no connection accepted the
    ///   message, including when the pool is empty.
    /// - [`PoolError::Closed`] if the pool has been closed.
    pub async fn broadcast_message<M: Message<S>>(&self, message: M) -> Result<usize, PoolError> {
        self.ensure_registered(&message)?;
        let targets = self
            .inner
            .strand
            .run(|state| {
                state
                    .by_id
                    .values()
                    .map(|record| (record.id, record.outbound.clone()))
                    .collect::<Vec<_>>()
            })
            .await?;
        if targets.is_empty() {
            return Err(PoolError::NoAvailableConnection);
        }

        let message: Outbound<S> = Arc::new(message);
        let grace = self.inner.config.broadcast_grace;
        let outcomes = join_all(
            targets
                .iter()
                .map(|(_, sender)| sender.send_timeout(Arc::clone(&message), grace)),
        )
        .await;

        let mut delivered = 0;
        let mut blocked = Vec::new();
        for ((id, _), outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => blocked.push(id),
                Err(SendTimeoutError::Closed(_)) => {}
            }
        }
        for id in blocked {
            metrics::inc_write_queue_full();
            warn!("broadcast blocked past grace period: connection_id={id}, grace={grace:?}");
            self.remove_connection(id, DisconnectReason::WriteQueueFull)
                .await;
        }
        if delivered == 0 {
            return Err(PoolError::NoAvailableConnection);
        }
        Ok(delivered)
    }

    /// Drop the connection to `addr`, if any, reporting `reason`.
    ///
    /// Idempotent: the disconnect callback fires only for the call that
    /// actually removed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn disconnect(&self, addr: &str, reason: DisconnectReason) -> Result<(), PoolError> {
        let key = addr.to_owned();
        let removed = self
            .inner
            .strand
            .run(move |state| state.remove_by_addr(&key))
            .await?;
        if let Some(record) = removed {
            self.teardown(&record, &reason);
        }
        Ok(())
    }

    /// Remove the connection with `id` if it is still registered.
    ///
    /// Matching on the id rather than the address means a task for an old
    /// connection can never remove its replacement.
    pub(crate) async fn remove_connection(&self, id: ConnectionId, reason: DisconnectReason) {
        match self
            .inner
            .strand
            .run(move |state| state.remove_by_id(id))
            .await
        {
            Ok(Some(record)) => self.teardown(&record, &reason),
            Ok(None) => {}
            Err(_) => debug!("pool closed before connection removal: connection_id={id}"),
        }
    }

    fn teardown(&self, record: &Connection<S>, reason: &DisconnectReason) {
        record.cancel.cancel();
        metrics::dec_connections();
        metrics::inc_disconnects(reason.label());
        info!(
            "connection closed: connection_id={}, remote_addr={}, reason={reason}",
            record.id, record.remote_addr
        );
        if let Some(callback) = &self.inner.config.on_disconnect {
            callback(&record.remote_addr, reason);
        }
    }

    /// Drop every connection and stop accepting.
    ///
    /// Each removed connection is reported with
    /// [`DisconnectReason::PoolShutdown`]. The pool stays usable: it may
    /// serve and dial again afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let (records, listening) = self
            .inner
            .strand
            .run(|state| (state.drain(), state.listening.take()))
            .await?;
        if let Some(listening) = listening {
            listening.token.cancel();
        }
        let reason = DisconnectReason::PoolShutdown;
        for record in &records {
            self.teardown(record, &reason);
        }
        Ok(())
    }

    /// Shut down and stop the strand for good, then wait for connection
    /// tasks to finish. Later operations fail with [`PoolError::Closed`].
    pub async fn close(&self) {
        if let Err(e) = self.shutdown().await {
            debug!("pool already closed: error={e}");
        }
        self.inner.strand.close();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.strand.is_closed() }

    /// Snapshot of the connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn get_connection(&self, addr: &str) -> Result<Option<ConnectionInfo>, PoolError> {
        let key = addr.to_owned();
        self.inner
            .strand
            .run(move |state| state.get(&key).map(Connection::info))
            .await
    }

    /// Snapshots of every connection, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn get_connections(&self) -> Result<Vec<ConnectionInfo>, PoolError> {
        self.inner.strand.run(|state| state.snapshot()).await
    }

    /// Number of registered connections.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn size(&self) -> Result<usize, PoolError> {
        self.inner.strand.run(|state| state.by_id.len()).await
    }

    /// Whether a connection to `addr` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn is_conn_exist(&self, addr: &str) -> Result<bool, PoolError> {
        let key = addr.to_owned();
        self.inner
            .strand
            .run(move |state| state.by_addr.contains_key(&key))
            .await
    }

    /// Queue `ping` on every connection that has not sent anything for at
    /// least `rate`, returning how many were queued.
    ///
    /// Connections whose queue is full are skipped; they are busy sending.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Codec`] if the ping type is not registered and
    /// [`PoolError::Closed`] if the pool has been closed.
    pub async fn send_pings<M: Message<S>>(&self, rate: Duration, ping: M) -> Result<usize, PoolError> {
        self.ensure_registered(&ping)?;
        let idle = self
            .inner
            .strand
            .run(move |state| {
                let now = Instant::now();
                state
                    .by_id
                    .values()
                    .filter(|record| {
                        now.saturating_duration_since(record.activity.last_sent()) >= rate
                    })
                    .map(|record| (record.id, record.outbound.clone()))
                    .collect::<Vec<_>>()
            })
            .await?;
        let ping: Outbound<S> = Arc::new(ping);
        let mut queued = 0;
        for (id, sender) in idle {
            match sender.try_send(Arc::clone(&ping)) {
                Ok(()) => queued += 1,
                Err(e) => debug!("ping skipped: connection_id={id}, error={e}"),
            }
        }
        Ok(queued)
    }

    /// Disconnect every connection that has received nothing for longer
    /// than `idle_limit`, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn clear_stale_connections(
        &self,
        idle_limit: Duration,
        reason: DisconnectReason,
    ) -> Result<usize, PoolError> {
        let stale = self
            .inner
            .strand
            .run(move |state| {
                let now = Instant::now();
                state.remove_where(|record| {
                    now.saturating_duration_since(record.activity.last_received()) > idle_limit
                })
            })
            .await?;
        for record in &stale {
            self.teardown(record, &reason);
        }
        Ok(stale.len())
    }

    /// Take the receiving end of the send-result queue.
    ///
    /// Returns `None` after the first call. Results published while the
    /// queue is full are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been closed.
    pub async fn take_send_results(
        &self,
    ) -> Result<Option<mpsc::Receiver<SendResult<S>>>, PoolError> {
        self.inner.strand.run(|state| state.results.take()).await
    }

    pub(crate) fn publish(&self, result: SendResult<S>) {
        if let Err(TrySendError::Full(result)) = self.inner.results.try_send(result) {
            debug!(
                "send result dropped, queue full: connection_id={}, remote_addr={}",
                result.connection_id, result.remote_addr
            );
        }
    }

    fn ensure_registered(&self, message: &dyn Message<S>) -> Result<(), PoolError> {
        match self.inner.registry.prefix_of(message) {
            Some(_) => Ok(()),
            None => Err(CodecError::UnregisteredMessage {
                type_name: message.type_name(),
            }
            .into()),
        }
    }

    /// Register a connection with no socket behind it, returning the
    /// receiving end of its outbound queue.
    #[cfg(test)]
    pub(crate) async fn attach_detached(
        &self,
        remote_addr: &str,
        queue_size: usize,
    ) -> (ConnectionId, mpsc::Receiver<Outbound<S>>) {
        let remote_addr = remote_addr.to_owned();
        let max = self.inner.config.max_connections;
        self.inner
            .strand
            .run(move |state| {
                state
                    .check_admission(&remote_addr, max)
                    .expect("test connection admitted");
                let id = state.allocate_id();
                let (record, outbound) = Connection::new(id, remote_addr, false, queue_size);
                state.insert(record);
                (id, outbound)
            })
            .await
            .expect("pool open")
    }
}
