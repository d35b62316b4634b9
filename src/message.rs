//! Message capabilities required by the connection pool.
//!
//! Application message variants implement two traits:
//!
//! - [`Serializer`] converts the body to and from its binary wire form.
//! - [`Message`] hands a decoded value to application code.
//!
//! The pool never inspects message contents. It only needs a variant's
//! registered [`crate::MessagePrefix`], its body encoding, and somewhere to
//! deliver it.

use std::{any::Any, error::Error, fmt};

use bytes::BytesMut;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Error type returned by [`Message::handle`].
///
/// Any error returned from a handler becomes the
/// [`crate::DisconnectReason`] for the connection that produced the message.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Errors raised while encoding a message body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// A variable-length field does not fit in a `u32` length prefix.
    #[error("field of {0} bytes exceeds the u32 length prefix")]
    LengthOverflow(usize),
    /// A nested bincode value failed to encode.
    #[error("bincode encoding failed: {0}")]
    Bincode(#[from] bincode::error::EncodeError),
    /// Application-defined encoding failure.
    #[error("{0}")]
    Custom(String),
}

/// Errors raised while decoding a message body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The body ended before a field was complete.
    #[error("unexpected end of body: needed {needed} bytes, {available} available")]
    UnexpectedEnd {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the body.
        available: usize,
    },
    /// A boolean field held something other than `0` or `1`.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A nested bincode value failed to decode.
    #[error("bincode decoding failed: {0}")]
    Bincode(#[from] bincode::error::DecodeError),
    /// Application-defined decoding failure.
    #[error("{0}")]
    Custom(String),
}

/// Binary body encoding for a message variant.
///
/// `encode_size` must report exactly the number of bytes `encode` appends;
/// the codec rejects messages where the two disagree. `decode` returns the
/// decoded value together with the number of bytes it consumed, which must
/// equal the body length of the frame it came from.
///
/// The [`crate::wire`] module provides helpers implementing the standard
/// field encodings.
pub trait Serializer {
    /// Number of bytes [`Serializer::encode`] will write.
    fn encode_size(&self) -> usize;

    /// Append the encoded body to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if a field cannot be represented.
    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError>;

    /// Decode a body from `src`, returning the value and bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `src` does not hold a valid body.
    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized;
}

/// Identifies the connection a message arrived on.
///
/// A fresh context is built for every received message and moved into
/// [`Message::handle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageContext {
    id: ConnectionId,
    remote_addr: String,
}

impl MessageContext {
    /// Create a context for the connection `id` at `remote_addr`.
    #[must_use]
    pub fn new(id: ConnectionId, remote_addr: impl Into<String>) -> Self {
        Self {
            id,
            remote_addr: remote_addr.into(),
        }
    }

    /// Identifier of the connection that produced the message.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId { self.id }

    /// Remote address of the connection, as used by the pool's address index.
    #[must_use]
    pub fn remote_addr(&self) -> &str { &self.remote_addr }
}

/// Access to the concrete type behind a `dyn Message`.
///
/// Implemented for every sized `'static` type. Call it through a
/// `&dyn Message<S>`, never through a `Box` or `Arc`, or the smart pointer's
/// own type is reported instead.
pub trait AsAny {
    /// Borrow `self` as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// Name of the concrete type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any { self }

    fn type_name(&self) -> &'static str { std::any::type_name::<T>() }
}

/// A message variant the pool can route.
///
/// `S` is the application state shared by every handler invocation.
/// `handle` should forward the message to application logic quickly, for
/// example by queueing it; it runs on the connection's orchestrator task, so
/// a slow handler delays every later frame from the same peer.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use peerwire::{
///     message::{DecodeError, EncodeError, HandlerError, Message, MessageContext, Serializer},
///     wire::{WireField, WireReader},
/// };
///
/// #[derive(Debug)]
/// struct Ping(u64);
///
/// impl Serializer for Ping {
///     fn encode_size(&self) -> usize { self.0.wire_size() }
///
///     fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }
///
///     fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
///         let mut reader = WireReader::new(src);
///         let nonce = reader.read()?;
///         Ok((Ping(nonce), reader.consumed()))
///     }
/// }
///
/// impl Message<()> for Ping {
///     fn handle(self: Box<Self>, _ctx: MessageContext, _state: &()) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
/// ```
pub trait Message<S>: Serializer + AsAny + fmt::Debug + Send + Sync + 'static {
    /// Deliver the decoded message to application code.
    ///
    /// # Errors
    ///
    /// Returning an error disconnects the peer, with the error recorded as
    /// the disconnect reason.
    fn handle(self: Box<Self>, ctx: MessageContext, state: &S) -> Result<(), HandlerError>;
}
