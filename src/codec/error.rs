//! Error types for the codec layer.
//!
//! Framing errors ([`CodecError::InvalidMessageLength`]) and body errors
//! (unknown identifier, malformed or short bodies) are protocol violations:
//! the peer is not speaking the protocol, so the connection is dropped.
//! Encoding errors are local defects, reported to whoever tried to send.

use std::io;

use thiserror::Error;

use crate::prefix::MessagePrefix;

/// Errors produced while framing, encoding or decoding messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// A frame declared a length outside `4..=max`.
    #[error("invalid message length {length}; must be between 4 and {max}")]
    InvalidMessageLength {
        /// Length declared by the frame header.
        length: usize,
        /// Largest length the connection accepts.
        max: usize,
    },
    /// A frame was too short to hold a message identifier.
    #[error("message of {len} bytes is too short for a message identifier")]
    TruncatedMessageId {
        /// Bytes available in the frame.
        len: usize,
    },
    /// No variant is registered for the identifier.
    #[error("unknown message identifier {0:?}")]
    UnknownMessage(MessagePrefix),
    /// The body could not be decoded, or the decoder panicked.
    #[error("malformed {prefix} message: {reason}")]
    MalformedMessage {
        /// Identifier of the frame.
        prefix: MessagePrefix,
        /// Decoder error or panic payload.
        reason: String,
    },
    /// The decoder did not consume the whole body.
    #[error("{prefix} message decoded {consumed} of {expected} body bytes")]
    MessageDecodeUnderflow {
        /// Identifier of the frame.
        prefix: MessagePrefix,
        /// Bytes the decoder consumed.
        consumed: usize,
        /// Body length carried by the frame.
        expected: usize,
    },
    /// The message type was never registered.
    #[error("message type {type_name} is not registered")]
    UnregisteredMessage {
        /// Rust type name of the message.
        type_name: &'static str,
    },
    /// The message body failed to encode.
    #[error("failed to encode {prefix} message: {reason}")]
    Encode {
        /// Identifier of the message.
        prefix: MessagePrefix,
        /// Underlying encoder error.
        reason: String,
    },
    /// `encode_size` disagreed with the bytes `encode` produced.
    #[error("{prefix} message declared {declared} body bytes but wrote {written}")]
    EncodeSizeMismatch {
        /// Identifier of the message.
        prefix: MessagePrefix,
        /// Size reported by `encode_size`.
        declared: usize,
        /// Bytes actually written.
        written: usize,
    },
    /// The encoded frame does not fit the length header.
    #[error("encoded frame of {0} bytes exceeds the u32 length header")]
    FrameTooLarge(usize),
}

impl CodecError {
    /// Short, stable label used for metrics and structured logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidMessageLength { .. } => "invalid_message_length",
            Self::TruncatedMessageId { .. } => "truncated_message_id",
            Self::UnknownMessage(_) => "unknown_message",
            Self::MalformedMessage { .. } => "malformed_message",
            Self::MessageDecodeUnderflow { .. } => "message_decode_underflow",
            Self::UnregisteredMessage { .. } => "unregistered_message",
            Self::Encode { .. } => "encode",
            Self::EncodeSizeMismatch { .. } => "encode_size_mismatch",
            Self::FrameTooLarge(_) => "frame_too_large",
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self { io::Error::new(io::ErrorKind::InvalidData, err) }
}
