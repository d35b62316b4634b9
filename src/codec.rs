//! Length-prefixed framing and message encoding.
//!
//! Every frame on the wire has the layout
//!
//! ```text
//! [length: u32 LE][identifier: 4 bytes][body: length - 4 bytes]
//! ```
//!
//! where `length` counts the identifier and body but not itself. The
//! functions here split a byte stream into raw frames ([`extract_frames`]),
//! turn a raw frame into a typed message ([`decode`]), and turn a typed
//! message into wire bytes ([`encode`]).

use std::{
    io,
    panic::{self, AssertUnwindSafe},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    message::Message,
    panic::format_panic,
    prefix::{MessagePrefix, PREFIX_LEN},
    registry::Registry,
};

pub mod error;

pub use error::CodecError;

/// Size of the length header preceding each frame.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Smallest legal value of the length header: an identifier with no body.
pub const MIN_FRAME_LENGTH: usize = PREFIX_LEN;

/// Encode `message` as a complete wire frame.
///
/// # Errors
///
/// Returns [`CodecError::UnregisteredMessage`] if the message type was
/// never registered, which means the caller is sending a variant nobody
/// declared. Body encoding failures are reported as
/// [`CodecError::Encode`] or [`CodecError::EncodeSizeMismatch`].
///
/// # Examples
///
/// ```
/// # use bytes::BytesMut;
/// # use peerwire::{codec, Registry};
/// # use peerwire::message::*;
/// # #[derive(Debug)]
/// # struct ByteMessage(u8);
/// # impl Serializer for ByteMessage {
/// #     fn encode_size(&self) -> usize { 1 }
/// #     fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
/// #         dst.extend_from_slice(&[self.0]);
/// #         Ok(())
/// #     }
/// #     fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
/// #         let byte = *src.first().ok_or(DecodeError::UnexpectedEnd { needed: 1, available: 0 })?;
/// #         Ok((ByteMessage(byte), 1))
/// #     }
/// # }
/// # impl Message<()> for ByteMessage {
/// #     fn handle(self: Box<Self>, _: MessageContext, _: &()) -> Result<(), HandlerError> { Ok(()) }
/// # }
/// let registry = Registry::<()>::new().register::<ByteMessage>(*b"BYTE").unwrap();
/// let frame = codec::encode(&registry, &ByteMessage(7)).unwrap();
/// assert_eq!(&frame[..], &[5, 0, 0, 0, b'B', b'Y', b'T', b'E', 7]);
/// ```
pub fn encode<S>(registry: &Registry<S>, message: &dyn Message<S>) -> Result<Bytes, CodecError> {
    let prefix = registry
        .prefix_of(message)
        .ok_or_else(|| CodecError::UnregisteredMessage {
            type_name: message.type_name(),
        })?;
    let declared = message.encode_size();
    let length = PREFIX_LEN + declared;
    let header = u32::try_from(length).map_err(|_| CodecError::FrameTooLarge(length))?;

    let mut dst = BytesMut::with_capacity(LENGTH_HEADER_SIZE + length);
    dst.put_u32_le(header);
    dst.put_slice(prefix.as_bytes());
    message.encode(&mut dst).map_err(|err| CodecError::Encode {
        prefix,
        reason: err.to_string(),
    })?;

    let written = dst.len() - LENGTH_HEADER_SIZE - PREFIX_LEN;
    if written != declared {
        return Err(CodecError::EncodeSizeMismatch {
            prefix,
            declared,
            written,
        });
    }
    Ok(dst.freeze())
}

/// Decode a raw frame (identifier and body, without the length header).
///
/// Decoding is untrusted input parsing: a decoder that panics on a hostile
/// body is contained here and reported as [`CodecError::MalformedMessage`].
///
/// # Errors
///
/// - [`CodecError::TruncatedMessageId`] if `frame` is shorter than an identifier.
/// - [`CodecError::UnknownMessage`] if the identifier is not registered.
/// - [`CodecError::MalformedMessage`] if the body fails to decode.
/// - [`CodecError::MessageDecodeUnderflow`] if the decoder leaves bytes unread.
pub fn decode<S>(registry: &Registry<S>, frame: &[u8]) -> Result<Box<dyn Message<S>>, CodecError> {
    let Some((id, body)) = frame.split_first_chunk::<PREFIX_LEN>() else {
        return Err(CodecError::TruncatedMessageId { len: frame.len() });
    };
    let prefix = MessagePrefix::new(*id);
    let entry = registry
        .lookup(&prefix)
        .ok_or(CodecError::UnknownMessage(prefix))?;

    let (message, consumed) = match panic::catch_unwind(AssertUnwindSafe(|| entry.decode(body))) {
        Ok(Ok(decoded)) => decoded,
        Ok(Err(err)) => {
            return Err(CodecError::MalformedMessage {
                prefix,
                reason: err.to_string(),
            });
        }
        Err(payload) => {
            return Err(CodecError::MalformedMessage {
                prefix,
                reason: format!("decoder panicked: {}", format_panic(payload)),
            });
        }
    };
    if consumed != body.len() {
        return Err(CodecError::MessageDecodeUnderflow {
            prefix,
            consumed,
            expected: body.len(),
        });
    }
    Ok(message)
}

/// Take the next complete frame from `buffer`, if one is buffered.
///
/// Returns `Ok(None)` without consuming anything while the frame is still
/// incomplete.
fn next_frame(buffer: &mut BytesMut, max_frame_length: usize) -> Result<Option<Bytes>, CodecError> {
    let Some(header) = buffer.first_chunk::<LENGTH_HEADER_SIZE>() else {
        return Ok(None);
    };
    let length = usize::try_from(u32::from_le_bytes(*header)).unwrap_or(usize::MAX);
    if !(MIN_FRAME_LENGTH..=max_frame_length).contains(&length) {
        return Err(CodecError::InvalidMessageLength {
            length,
            max: max_frame_length,
        });
    }
    if buffer.len() - LENGTH_HEADER_SIZE < length {
        buffer.reserve(LENGTH_HEADER_SIZE + length - buffer.len());
        return Ok(None);
    }
    buffer.advance(LENGTH_HEADER_SIZE);
    Ok(Some(buffer.split_to(length).freeze()))
}

/// Split every complete frame out of `buffer`.
///
/// Frames are returned in order with their length header stripped. A
/// trailing partial frame stays in `buffer` untouched until more bytes
/// arrive.
///
/// # Errors
///
/// Returns [`CodecError::InvalidMessageLength`] when a header declares a
/// length below 4 or above `max_frame_length`. The stream cannot be
/// resynchronised after that, so the connection must be dropped.
pub fn extract_frames(
    buffer: &mut BytesMut,
    max_frame_length: usize,
) -> Result<Vec<Bytes>, CodecError> {
    let mut frames = Vec::new();
    while buffer.len() > LENGTH_HEADER_SIZE {
        match next_frame(buffer, max_frame_length)? {
            Some(frame) => frames.push(frame),
            None => break,
        }
    }
    Ok(frames)
}

/// Tokio codec speaking the frame layout, for use with
/// [`tokio_util::codec::Framed`].
///
/// Decoded items are raw frames (identifier and body); encoding prepends the
/// length header to a raw frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    /// Construct a codec accepting frames up to `max_frame_length` bytes.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.max(MIN_FRAME_LENGTH),
        }
    }

    /// Largest length header this codec accepts.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(next_frame(src, self.max_frame_length)?)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.len();
        if !(MIN_FRAME_LENGTH..=self.max_frame_length).contains(&length) {
            return Err(CodecError::InvalidMessageLength {
                length,
                max: self.max_frame_length,
            }
            .into());
        }
        let header = u32::try_from(length).map_err(|_| CodecError::FrameTooLarge(length))?;
        dst.reserve(LENGTH_HEADER_SIZE + length);
        dst.put_u32_le(header);
        dst.put_slice(&item);
        Ok(())
    }
}
