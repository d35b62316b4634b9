//! Public API for the `peerwire` library.
//!
//! `peerwire` is a message-oriented TCP transport for peer-to-peer daemons.
//! It frames an application-defined binary protocol, resolves each frame's
//! four-byte identifier through an explicit [`Registry`], and routes decoded
//! messages to their handlers while a [`ConnectionPool`] manages dialing,
//! accepting, broadcasting and tearing down peers.

pub mod codec;
pub mod connection;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod pool;
pub mod prefix;
pub mod reason;
pub mod registry;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{CodecError, FrameCodec};
pub use connection::{ConnectionId, ConnectionInfo, Outbound};
pub use message::{HandlerError, Message, MessageContext, Serializer};
pub use metrics::{CONNECTIONS_ACTIVE, DISCONNECTS_TOTAL, Direction, FRAMES_PROCESSED};
pub use pool::{BoundListener, ConnectionPool, PoolConfig, PoolError, SendResult};
pub use prefix::{MessagePrefix, PrefixError};
pub use reason::DisconnectReason;
pub use registry::{Registry, RegistryError};
