//! Message fixtures shared by unit tests.

use bytes::{BufMut, BytesMut};
use tokio::sync::mpsc;

use crate::{
    message::{DecodeError, EncodeError, HandlerError, Message, MessageContext, Serializer},
    wire::{Bincoded, WireField, WireReader},
};

/// Application state used by tests: records every delivered message.
pub(crate) trait Sink: Send + Sync + 'static {
    fn deliver(&self, ctx: MessageContext, message: String);
}

impl Sink for () {
    fn deliver(&self, _ctx: MessageContext, _message: String) {}
}

/// Forwards deliveries to a channel the test reads from.
pub(crate) struct Inbox(pub(crate) mpsc::UnboundedSender<(MessageContext, String)>);

impl Inbox {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<(MessageContext, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl Sink for Inbox {
    fn deliver(&self, ctx: MessageContext, message: String) { let _ = self.0.send((ctx, message)); }
}

/// One-byte payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ByteMessage(pub(crate) u8);

impl Serializer for ByteMessage {
    fn encode_size(&self) -> usize { 1 }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_u8(self.0);
        Ok(())
    }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let value = reader.read()?;
        Ok((Self(value), reader.consumed()))
    }
}

impl<S: Sink> Message<S> for ByteMessage {
    fn handle(self: Box<Self>, ctx: MessageContext, state: &S) -> Result<(), HandlerError> {
        state.deliver(ctx, format!("byte:{}", self.0));
        Ok(())
    }
}

/// Length-prefixed text payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TextMessage(pub(crate) String);

impl From<&str> for TextMessage {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl Serializer for TextMessage {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let text = reader.read()?;
        Ok((Self(text), reader.consumed()))
    }
}

impl<S: Sink> Message<S> for TextMessage {
    fn handle(self: Box<Self>, ctx: MessageContext, state: &S) -> Result<(), HandlerError> {
        if self.0 == "reject" {
            return Err("handler rejected message".into());
        }
        state.deliver(ctx, format!("text:{}", self.0));
        Ok(())
    }
}

/// Decoder that panics on any body starting with `0xFF`.
#[derive(Debug)]
pub(crate) struct PanickyMessage;

impl Serializer for PanickyMessage {
    fn encode_size(&self) -> usize { 0 }

    fn encode(&self, _dst: &mut BytesMut) -> Result<(), EncodeError> { Ok(()) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        assert!(src.first() != Some(&0xFF), "hostile body");
        Ok((Self, src.len()))
    }
}

impl<S: Sink> Message<S> for PanickyMessage {
    fn handle(self: Box<Self>, _ctx: MessageContext, _state: &S) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Reports one more byte than it writes.
#[derive(Debug)]
pub(crate) struct LyingMessage;

impl Serializer for LyingMessage {
    fn encode_size(&self) -> usize { 2 }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> {
        dst.put_u8(0);
        Ok(())
    }

    fn decode(_src: &[u8]) -> Result<(Self, usize), DecodeError> { Ok((Self, 0)) }
}

impl<S: Sink> Message<S> for LyingMessage {
    fn handle(self: Box<Self>, _ctx: MessageContext, _state: &S) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Panics when handled.
#[derive(Debug)]
pub(crate) struct ExplodingMessage;

impl Serializer for ExplodingMessage {
    fn encode_size(&self) -> usize { 0 }

    fn encode(&self, _dst: &mut BytesMut) -> Result<(), EncodeError> { Ok(()) }

    fn decode(_src: &[u8]) -> Result<(Self, usize), DecodeError> { Ok((Self, 0)) }
}

impl<S: Sink> Message<S> for ExplodingMessage {
    fn handle(self: Box<Self>, _ctx: MessageContext, _state: &S) -> Result<(), HandlerError> {
        panic!("handler exploded")
    }
}

/// Nested structure carried as a bincode field.
#[derive(Debug)]
pub(crate) struct BlobMessage(pub(crate) Bincoded<(u32, String)>);

impl Serializer for BlobMessage {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let blob = reader.read()?;
        Ok((Self(blob), reader.consumed()))
    }
}

impl<S: Sink> Message<S> for BlobMessage {
    fn handle(self: Box<Self>, _ctx: MessageContext, _state: &S) -> Result<(), HandlerError> {
        Ok(())
    }
}
