//! Errors returned by [`super::ConnectionPool`] operations.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{codec::CodecError, reason::DisconnectReason, registry::RegistryError};

/// Errors returned synchronously to callers of pool operations.
///
/// Connection-local failures never surface here; they end the connection and
/// reach the application through the disconnect callback instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Binding the listening socket failed.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    /// Dialing a peer failed.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// Address that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Dialing a peer did not complete within the dial timeout.
    #[error("dialing {addr} timed out after {timeout:?}")]
    DialTimeout {
        /// Address that was dialed.
        addr: String,
        /// Configured dial timeout.
        timeout: Duration,
    },
    /// A connection to the address is already registered.
    #[error("already connected to {0}")]
    DuplicateConnection(String),
    /// The pool already holds `max_connections` connections.
    #[error("connection limit of {max} reached")]
    PoolFull {
        /// Configured connection limit.
        max: usize,
    },
    /// No connection to the address is registered.
    #[error("not connected to {0}")]
    NotConnected(String),
    /// The connection's outbound queue is full.
    #[error("write queue full for {0}")]
    WriteQueueFull(String),
    /// A broadcast reached no connection.
    #[error("no available connection")]
    NoAvailableConnection,
    /// The pool has been closed.
    #[error("connection pool closed")]
    Closed,
    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The registry handed to the pool is invalid.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Writing a queued message ended the connection.
    #[error("write failed: {0}")]
    Write(#[from] DisconnectReason),
}
