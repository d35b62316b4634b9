//! Shared utilities for integration tests.
//!
//! Provides a small message set, an application state that records every
//! delivery, and helpers for standing up pools on ephemeral local ports.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{future::Future, net::SocketAddr, time::Duration};

use bytes::BytesMut;
use peerwire::{
    ConnectionPool,
    PoolConfig,
    Registry,
    message::{DecodeError, EncodeError, HandlerError, Message, MessageContext, Serializer},
    wire::{WireField, WireReader},
};
use tokio::{sync::mpsc, time::timeout};

/// How long any single expectation may take before the test fails.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Application state that forwards each delivered note to the test.
pub struct Recorder {
    notes: mpsc::UnboundedSender<(MessageContext, String)>,
}

/// Free-form text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note(pub String);

impl From<&str> for Note {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl Serializer for Note {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let text = reader.read()?;
        Ok((Self(text), reader.consumed()))
    }
}

impl Message<Recorder> for Note {
    fn handle(self: Box<Self>, ctx: MessageContext, state: &Recorder) -> Result<(), HandlerError> {
        state
            .notes
            .send((ctx, self.0))
            .map_err(|_| HandlerError::from("test dropped its inbox"))
    }
}

/// Message whose handler always fails.
#[derive(Debug)]
pub struct Refuse;

impl Serializer for Refuse {
    fn encode_size(&self) -> usize { 0 }

    fn encode(&self, _dst: &mut BytesMut) -> Result<(), EncodeError> { Ok(()) }

    fn decode(_src: &[u8]) -> Result<(Self, usize), DecodeError> { Ok((Self, 0)) }
}

impl Message<Recorder> for Refuse {
    fn handle(self: Box<Self>, _ctx: MessageContext, _state: &Recorder) -> Result<(), HandlerError> {
        Err("refused".into())
    }
}

/// Observable side of a test pool.
pub struct Harness {
    pub pool: ConnectionPool<Recorder>,
    pub notes: mpsc::UnboundedReceiver<(MessageContext, String)>,
    pub connects: mpsc::UnboundedReceiver<(String, bool)>,
    pub disconnects: mpsc::UnboundedReceiver<(String, &'static str)>,
}

/// Pool configuration listening on an ephemeral localhost port.
pub fn local_config() -> PoolConfig { PoolConfig::default().listen_addr(([127, 0, 0, 1], 0).into()) }

/// Build a pool over `config` with callbacks wired to channels.
pub fn harness(config: PoolConfig) -> Harness {
    let (notes_tx, notes) = mpsc::unbounded_channel();
    let (connects_tx, connects) = mpsc::unbounded_channel();
    let (disconnects_tx, disconnects) = mpsc::unbounded_channel();
    let config = config
        .on_connect(move |addr, solicited| {
            let _ = connects_tx.send((addr.to_owned(), solicited));
        })
        .on_disconnect(move |addr, reason| {
            let _ = disconnects_tx.send((addr.to_owned(), reason.label()));
        });
    let registry = Registry::<Recorder>::new()
        .register::<Note>(*b"NOTE")
        .and_then(|r| r.register::<Refuse>(*b"NOPE"))
        .expect("register fixture messages");
    let pool = ConnectionPool::new(config, registry, Recorder { notes: notes_tx })
        .expect("valid registry");
    Harness {
        pool,
        notes,
        connects,
        disconnects,
    }
}

/// Bind `pool` and serve it in the background, returning its address.
pub async fn serve<S: Send + Sync + 'static>(pool: &ConnectionPool<S>) -> SocketAddr {
    let listener = pool.bind().await.expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    let pool = pool.clone();
    tokio::spawn(async move { pool.serve(listener).await });
    addr
}

/// Receive the next item from `rx`, failing the test after [`PATIENCE`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(PATIENCE, rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

/// Poll `condition` until it yields `true`, failing the test after [`PATIENCE`].
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(PATIENCE, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition met within timeout");
}
