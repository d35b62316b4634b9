//! Demonstration node built on `peerwire`.
//!
//! Accepts and dials peers, greets each with a `HELO` message, answers
//! pings with pongs and runs the keepalive and stale-peer sweeps.

mod cli;

use std::{error::Error, time::Duration};

use bincode::{Decode, Encode};
use bytes::BytesMut;
use clap::Parser;
use log::{info, warn};
use peerwire::{
    ConnectionPool,
    DisconnectReason,
    PoolConfig,
    Registry,
    message::{DecodeError, EncodeError, HandlerError, Message, MessageContext, Serializer},
    wire::{Bincoded, WireField, WireReader},
};
use tokio::{signal, sync::mpsc, time};

/// Something the node's event loop must react to.
#[derive(Debug)]
enum Event {
    Connected(String),
    Hello(String, NodeInfo),
    Ping(String, u64),
    Pong(String, u64),
}

/// Application state shared with every handler.
struct Node {
    events: mpsc::UnboundedSender<Event>,
}

impl Node {
    fn emit(&self, event: Event) -> Result<(), HandlerError> {
        self.events
            .send(event)
            .map_err(|_| HandlerError::from("node event loop stopped"))
    }
}

#[derive(Clone, Debug, Encode, Decode)]
struct NodeInfo {
    version: u32,
    user_agent: String,
    listen_port: u16,
}

/// Greeting sent to every new peer.
#[derive(Debug)]
struct Hello(Bincoded<NodeInfo>);

impl Serializer for Hello {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let info = reader.read()?;
        Ok((Self(info), reader.consumed()))
    }
}

impl Message<Node> for Hello {
    fn handle(self: Box<Self>, ctx: MessageContext, node: &Node) -> Result<(), HandlerError> {
        node.emit(Event::Hello(ctx.remote_addr().to_owned(), self.0.into_inner()))
    }
}

#[derive(Debug)]
struct Ping(u64);

#[derive(Debug)]
struct Pong(u64);

impl Serializer for Ping {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let nonce = reader.read()?;
        Ok((Self(nonce), reader.consumed()))
    }
}

impl Serializer for Pong {
    fn encode_size(&self) -> usize { self.0.wire_size() }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), EncodeError> { self.0.write_wire(dst) }

    fn decode(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = WireReader::new(src);
        let nonce = reader.read()?;
        Ok((Self(nonce), reader.consumed()))
    }
}

impl Message<Node> for Ping {
    fn handle(self: Box<Self>, ctx: MessageContext, node: &Node) -> Result<(), HandlerError> {
        node.emit(Event::Ping(ctx.remote_addr().to_owned(), self.0))
    }
}

impl Message<Node> for Pong {
    fn handle(self: Box<Self>, ctx: MessageContext, node: &Node) -> Result<(), HandlerError> {
        node.emit(Event::Pong(ctx.remote_addr().to_owned(), self.0))
    }
}

fn registry() -> Result<Registry<Node>, peerwire::RegistryError> {
    Registry::new()
        .register::<Hello>(*b"HELO")?
        .register::<Ping>(*b"PING")?
        .register::<Pong>(*b"PONG")
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: Option<std::net::SocketAddr>) -> Result<(), Box<dyn Error>> {
    if let Some(addr) = addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("serving metrics: addr={addr}");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: Option<std::net::SocketAddr>) -> Result<(), Box<dyn Error>> {
    if addr.is_some() {
        warn!("metrics endpoint requested but the metrics feature is disabled");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Enable structured logging; `log` records are captured through tracing.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics(cli.metrics_addr)?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let connected = events_tx.clone();
    let config = PoolConfig::default()
        .listen_addr(cli.listen)
        .max_connections(cli.max_connections)
        .max_message_length(cli.max_message_length)
        .debug(cli.debug)
        .on_connect(move |addr, _solicited| {
            let _ = connected.send(Event::Connected(addr.to_owned()));
        })
        .on_disconnect(|addr, reason| info!("peer dropped: addr={addr}, reason={reason}"));
    let pool = ConnectionPool::new(config, registry()?, Node { events: events_tx })?;

    let listener = pool.bind().await?;
    let listen_port = listener.local_addr()?.port();
    tokio::spawn({
        let pool = pool.clone();
        async move {
            if let Err(e) = pool.serve(listener).await {
                warn!("listener stopped: error={e}");
            }
        }
    });

    for peer in &cli.peers {
        if let Err(e) = pool.connect(peer).await {
            warn!("failed to connect: addr={peer}, error={e}");
        }
    }

    let ping_interval = Duration::from_secs(cli.ping_interval);
    let stale_after = Duration::from_secs(cli.stale_after);
    let mut sweep = time::interval(ping_interval.min(stale_after).max(Duration::from_secs(1)));
    let mut nonce = 0_u64;
    let hello = || {
        Hello(Bincoded(NodeInfo {
            version: 1,
            user_agent: format!("peerwire/{}", env!("CARGO_PKG_VERSION")),
            listen_port,
        }))
    };

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = sweep.tick() => {
                nonce = nonce.wrapping_add(1);
                let pinged = pool.send_pings(ping_interval, Ping(nonce)).await?;
                let cleared = pool
                    .clear_stale_connections(stale_after, DisconnectReason::Stale)
                    .await?;
                if pinged + cleared > 0 {
                    info!("sweep: pinged={pinged}, cleared={cleared}");
                }
            }
            Some(event) = events.recv() => match event {
                Event::Connected(addr) => {
                    if let Err(e) = pool.send_message(&addr, hello()).await {
                        warn!("failed to greet peer: addr={addr}, error={e}");
                    }
                }
                Event::Hello(addr, info) => info!(
                    "peer greeting: addr={addr}, version={}, user_agent={}, listen_port={}",
                    info.version, info.user_agent, info.listen_port
                ),
                Event::Ping(addr, nonce) => {
                    if let Err(e) = pool.send_message(&addr, Pong(nonce)).await {
                        warn!("failed to answer ping: addr={addr}, error={e}");
                    }
                }
                Event::Pong(addr, nonce) => info!("pong: addr={addr}, nonce={nonce}"),
            },
        }
    }

    info!("shutting down");
    pool.close().await;
    Ok(())
}
