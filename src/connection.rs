//! Per-socket connection state.
//!
//! A connection is split in two halves. [`Connection`] is the record stored
//! in the pool's indexes: identity, the sending side of the outbound queue,
//! activity timestamps and the cancellation token that stops its tasks.
//! [`ConnectionIo`] is owned by the connection's own tasks: the socket
//! halves, the buffer of unconsumed wire bytes and the receiving side of the
//! outbound queue. No other task ever touches a `ConnectionIo`.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Message queued for delivery to one or more connections.
///
/// Broadcasts share a single allocation across every destination queue.
pub type Outbound<S> = Arc<dyn Message<S>>;

/// Initial capacity of a connection's read buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Identifier assigned to a connection.
///
/// Identifiers are handed out by the pool in increasing order and never
/// reused, so a peer that reconnects receives a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last-sent and last-received timestamps shared between a connection's
/// tasks and the pool's sweeps.
///
/// Times are stored as nanosecond offsets from the connection's creation so
/// they fit in atomics.
#[derive(Debug)]
pub(crate) struct Activity {
    epoch: Instant,
    last_sent: AtomicU64,
    last_received: AtomicU64,
}

impl Activity {
    pub(crate) fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            last_sent: AtomicU64::new(0),
            last_received: AtomicU64::new(0),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        u64::try_from(at.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    fn at(&self, offset: u64) -> Instant { self.epoch + Duration::from_nanos(offset) }

    pub(crate) fn mark_sent(&self) {
        self.last_sent
            .store(self.offset(Instant::now()), Ordering::Relaxed);
    }

    pub(crate) fn mark_received(&self) {
        self.last_received
            .store(self.offset(Instant::now()), Ordering::Relaxed);
    }

    pub(crate) fn last_sent(&self) -> Instant { self.at(self.last_sent.load(Ordering::Relaxed)) }

    pub(crate) fn last_received(&self) -> Instant {
        self.at(self.last_received.load(Ordering::Relaxed))
    }
}

/// Pool-side record of a live connection.
pub(crate) struct Connection<S> {
    pub(crate) id: ConnectionId,
    pub(crate) remote_addr: String,
    pub(crate) solicited: bool,
    pub(crate) outbound: mpsc::Sender<Outbound<S>>,
    pub(crate) activity: Arc<Activity>,
    pub(crate) cancel: CancellationToken,
}

impl<S> Connection<S> {
    /// Build a pool record together with the receiving end of its queue.
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: String,
        solicited: bool,
        queue_size: usize,
    ) -> (Self, mpsc::Receiver<Outbound<S>>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_size.max(1));
        let record = Self {
            id,
            remote_addr,
            solicited,
            outbound: outbound_tx,
            activity: Arc::new(Activity::new(Instant::now())),
            cancel: CancellationToken::new(),
        };
        (record, outbound_rx)
    }

    /// Build the pool record and the matching task-side state for `stream`.
    pub(crate) fn open(
        id: ConnectionId,
        remote_addr: String,
        solicited: bool,
        stream: TcpStream,
        queue_size: usize,
    ) -> (Self, ConnectionIo<S>) {
        let (record, outbound) = Self::new(id, remote_addr, solicited, queue_size);
        let (reader, writer) = stream.into_split();
        let io = ConnectionIo {
            id,
            remote_addr: record.remote_addr.clone(),
            reader,
            writer,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            outbound,
            activity: Arc::clone(&record.activity),
            cancel: record.cancel.clone(),
        };
        (record, io)
    }

    /// Copy the observable state of this connection.
    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote_addr: self.remote_addr.clone(),
            solicited: self.solicited,
            connected_at: self.activity.epoch,
            last_sent: self.activity.last_sent(),
            last_received: self.activity.last_received(),
            queued: self.outbound.max_capacity() - self.outbound.capacity(),
        }
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("solicited", &self.solicited)
            .finish_non_exhaustive()
    }
}

/// Task-side state of a connection.
pub(crate) struct ConnectionIo<S> {
    pub(crate) id: ConnectionId,
    pub(crate) remote_addr: String,
    pub(crate) reader: OwnedReadHalf,
    pub(crate) writer: OwnedWriteHalf,
    pub(crate) buffer: BytesMut,
    pub(crate) outbound: mpsc::Receiver<Outbound<S>>,
    pub(crate) activity: Arc<Activity>,
    pub(crate) cancel: CancellationToken,
}

/// Snapshot of a connection returned by the pool's read-only queries.
///
/// Snapshots are detached copies: holding one keeps nothing alive and
/// mutating one changes nothing in the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identifier assigned when the connection was registered.
    pub id: ConnectionId,
    /// Remote address used as the pool's address index key.
    pub remote_addr: String,
    /// Whether this process dialed the connection.
    pub solicited: bool,
    /// When the connection was registered.
    pub connected_at: Instant,
    /// Last time a frame was written, or `connected_at` if none was.
    pub last_sent: Instant,
    /// Last time bytes arrived, or `connected_at` if none did.
    pub last_received: Instant,
    /// Messages waiting in the outbound queue.
    pub queued: usize,
}
