//! Why a connection was dropped.

use std::{error::Error, io, sync::Arc};

use thiserror::Error;

use crate::codec::CodecError;

/// Reason passed to the disconnect callback.
///
/// The value describes why the connection ended; it is not a retry hint.
/// Reasons are cheap to clone so the same value can be logged, counted and
/// handed to the callback.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    ReadFailed(Arc<io::Error>),
    /// No bytes arrived within the read timeout.
    #[error("read timed out")]
    ReadTimeout,
    /// The peer closed its side of the connection.
    #[error("connection closed by peer")]
    ClosedByPeer,
    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    WriteFailed(Arc<io::Error>),
    /// A write did not complete within the write timeout.
    #[error("write timed out")]
    WriteTimeout,
    /// The peer violated the framing protocol or sent an undecodable body.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
    /// A broadcast could not enqueue to the connection within the grace period.
    #[error("write queue full")]
    WriteQueueFull,
    /// A message handler rejected the message.
    #[error("handler error: {0}")]
    Handler(Arc<dyn Error + Send + Sync>),
    /// The connection's task panicked.
    #[error("connection task panicked: {0}")]
    TaskPanicked(Arc<str>),
    /// The connection received nothing for longer than the idle limit.
    #[error("connection is stale")]
    Stale,
    /// The pool was shut down or closed.
    #[error("connection pool closed")]
    PoolShutdown,
    /// The application asked for the disconnect.
    #[error("{0}")]
    Requested(Arc<str>),
}

impl DisconnectReason {
    /// Build an application-supplied reason.
    ///
    /// ```
    /// use peerwire::DisconnectReason;
    ///
    /// let reason = DisconnectReason::requested("banned peer");
    /// assert_eq!(reason.to_string(), "banned peer");
    /// ```
    #[must_use]
    pub fn requested(reason: impl Into<Arc<str>>) -> Self { Self::Requested(reason.into()) }

    /// Short, stable label used for metrics and structured logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReadFailed(_) => "read_failed",
            Self::ReadTimeout => "read_timeout",
            Self::ClosedByPeer => "closed_by_peer",
            Self::WriteFailed(_) => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::Protocol(err) => err.label(),
            Self::WriteQueueFull => "write_queue_full",
            Self::Handler(_) => "handler",
            Self::TaskPanicked(_) => "task_panicked",
            Self::Stale => "stale",
            Self::PoolShutdown => "pool_shutdown",
            Self::Requested(_) => "requested",
        }
    }
}

impl From<Box<dyn Error + Send + Sync>> for DisconnectReason {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self { Self::Handler(Arc::from(err)) }
}
