//! Per-connection tasks.
//!
//! Every registered connection runs two tasks. The read task owns the read
//! half of the socket and the unconsumed-byte buffer; it reads with a
//! deadline, splits complete frames out of the buffer and forwards them.
//! The orchestrator owns the write half and the outbound queue, and waits on
//! three sources at once: cancellation, an inbound frame and an outbound
//! message. Whichever task hits a terminal error first decides the
//! connection's [`DisconnectReason`].

use std::{panic::AssertUnwindSafe, sync::Arc};

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use log::{debug, error};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    select,
    sync::mpsc,
    time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;

use super::{ConnectionPool, PoolError, SendResult};
use crate::{
    codec,
    connection::{Activity, ConnectionId, ConnectionIo, Outbound},
    message::MessageContext,
    metrics::{self, Direction},
    panic::format_panic,
    reason::DisconnectReason,
};

/// Frames buffered between the read task and the orchestrator.
const INBOUND_CAPACITY: usize = 64;

type Inbound = Result<Bytes, DisconnectReason>;

/// Spawn the read task and orchestrator for a freshly registered connection.
///
/// Panics inside either task are logged and end the connection with
/// [`DisconnectReason::TaskPanicked`].
pub(super) fn spawn_connection<S>(pool: &ConnectionPool<S>, io: ConnectionIo<S>)
where
    S: Send + Sync + 'static,
{
    let ConnectionIo {
        id,
        remote_addr,
        reader,
        writer,
        buffer,
        outbound,
        activity,
        cancel,
    } = io;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let read_task = ReadTask {
        reader,
        buffer,
        frames: inbound_tx,
        activity: Arc::clone(&activity),
        cancel: cancel.clone(),
        read_timeout: pool.config().read_timeout,
        max_frame_length: pool.config().max_message_length,
    };
    spawn_supervised(pool, id, remote_addr.clone(), read_task.run());

    let orchestrator = Orchestrator {
        pool: pool.clone(),
        id,
        remote_addr: remote_addr.clone(),
        writer,
        inbound: inbound_rx,
        outbound,
        activity,
        cancel,
    };
    spawn_supervised(pool, id, remote_addr, orchestrator.run());
}

/// Run one of a connection's tasks, ending the connection if it panics.
pub(super) fn spawn_supervised<S, F>(
    pool: &ConnectionPool<S>,
    id: ConnectionId,
    remote_addr: String,
    task: F,
)
where
    S: Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let handle = pool.clone();
    pool.spawn(async move {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            let panic_msg = format_panic(panic).to_string();
            // Emit via both `log` and `tracing` for tests that capture either.
            error!(
                "connection task panicked: panic={panic_msg}, connection_id={id}, \
                 remote_addr={remote_addr}"
            );
            tracing::error!(panic = %panic_msg, %id, %remote_addr, "connection task panicked");
            handle
                .remove_connection(id, DisconnectReason::TaskPanicked(panic_msg.into()))
                .await;
        }
    });
}

struct ReadTask {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    frames: mpsc::Sender<Inbound>,
    activity: Arc<Activity>,
    cancel: CancellationToken,
    read_timeout: Duration,
    max_frame_length: usize,
}

impl ReadTask {
    async fn run(mut self) {
        let reason = loop {
            let read = select! {
                biased;

                () = self.cancel.cancelled() => return,
                read = timeout(self.read_timeout, self.reader.read_buf(&mut self.buffer)) => read,
            };
            match read {
                Err(_) => break DisconnectReason::ReadTimeout,
                Ok(Err(e)) => break DisconnectReason::ReadFailed(Arc::new(e)),
                Ok(Ok(0)) => break DisconnectReason::ClosedByPeer,
                Ok(Ok(_)) => self.activity.mark_received(),
            }
            let frames = match codec::extract_frames(&mut self.buffer, self.max_frame_length) {
                Ok(frames) => frames,
                Err(e) => break e.into(),
            };
            for frame in frames {
                if self.frames.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        };
        self.buffer.clear();
        let _ = self.frames.send(Err(reason)).await;
    }
}

struct Orchestrator<S> {
    pool: ConnectionPool<S>,
    id: ConnectionId,
    remote_addr: String,
    writer: OwnedWriteHalf,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Receiver<Outbound<S>>,
    activity: Arc<Activity>,
    cancel: CancellationToken,
}

impl<S> Orchestrator<S>
where
    S: Send + Sync + 'static,
{
    async fn run(mut self) {
        let reason = loop {
            select! {
                biased;

                () = self.cancel.cancelled() => break None,
                frame = self.inbound.recv() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(reason) = self.dispatch(&frame) {
                            break Some(reason);
                        }
                    }
                    Some(Err(reason)) => break Some(reason),
                    None => break Some(DisconnectReason::ClosedByPeer),
                },
                message = self.outbound.recv() => match message {
                    Some(message) => {
                        if let Err(reason) = self.write(message).await {
                            break Some(reason);
                        }
                    }
                    None => break None,
                },
            }
        };
        self.outbound.close();
        if let Some(reason) = reason {
            self.pool.remove_connection(self.id, reason).await;
        }
        let _ = self.writer.shutdown().await;
    }

    /// Decode an inbound frame and hand it to its handler.
    fn dispatch(&self, frame: &[u8]) -> Result<(), DisconnectReason> {
        let message = codec::decode(self.pool.registry(), frame)?;
        metrics::inc_frames(Direction::Inbound);
        if self.pool.config().debug {
            debug!(
                "received message: connection_id={}, remote_addr={}, message={message:?}",
                self.id, self.remote_addr
            );
        }
        let ctx = MessageContext::new(self.id, self.remote_addr.clone());
        message.handle(ctx, self.pool.state())?;
        Ok(())
    }

    /// Encode and write one queued message, publishing the outcome.
    ///
    /// Encoding failures are reported to the send-result queue without
    /// ending the connection; write failures end it.
    async fn write(&mut self, message: Outbound<S>) -> Result<(), DisconnectReason> {
        let frame = match codec::encode(self.pool.registry(), &*message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    "failed to encode outbound message: error={e}, connection_id={}, \
                     remote_addr={}",
                    self.id, self.remote_addr
                );
                self.publish(message, Err(PoolError::Codec(e)));
                return Ok(());
            }
        };
        let written = timeout(
            self.pool.config().write_timeout,
            self.writer.write_all(&frame),
        )
        .await;
        let outcome = match written {
            Err(_) => Err(DisconnectReason::WriteTimeout),
            Ok(Err(e)) => Err(DisconnectReason::WriteFailed(Arc::new(e))),
            Ok(Ok(())) => Ok(()),
        };
        match outcome {
            Ok(()) => {
                self.activity.mark_sent();
                metrics::inc_frames(Direction::Outbound);
                if self.pool.config().debug {
                    debug!(
                        "sent message: connection_id={}, remote_addr={}, bytes={}, \
                         message={message:?}",
                        self.id,
                        self.remote_addr,
                        frame.len()
                    );
                }
                self.publish(message, Ok(()));
                Ok(())
            }
            Err(reason) => {
                self.publish(message, Err(PoolError::Write(reason.clone())));
                Err(reason)
            }
        }
    }

    fn publish(&self, message: Outbound<S>, result: Result<(), PoolError>) {
        self.pool.publish(SendResult {
            connection_id: self.id,
            remote_addr: self.remote_addr.clone(),
            message,
            result,
        });
    }
}
