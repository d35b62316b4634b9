//! Accept loop feeding inbound sockets into the pool.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::{ConnectionPool, PoolError, backoff::BackoffConfig};

/// Source of inbound connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept sockets from `listener` until `shutdown` is cancelled.
///
/// Each accepted socket is registered with `pool` on its own task so a slow
/// registration never stalls the loop. Accept failures are logged and retried
/// after an exponentially growing delay; failures seen after shutdown was
/// requested end the loop quietly.
pub(crate) async fn accept_loop<S, L>(
    listener: Arc<L>,
    pool: ConnectionPool<S>,
    shutdown: CancellationToken,
    backoff: BackoffConfig,
) where
    S: Send + Sync + 'static,
    L: AcceptListener + 'static,
{
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    delay = backoff.initial_delay;
                    spawn_registration(&pool, stream, peer_addr);
                }
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    select! {
                        biased;

                        () = shutdown.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
    debug!("accept loop stopped: local_addr={:?}", listener.local_addr().ok());
}

fn spawn_registration<S>(pool: &ConnectionPool<S>, stream: TcpStream, peer_addr: SocketAddr)
where
    S: Send + Sync + 'static,
{
    let handle = pool.clone();
    pool.spawn(async move {
        match handle
            .handle_connection(stream, peer_addr.to_string(), false)
            .await
        {
            Ok(_) => {}
            Err(PoolError::PoolFull { max }) => {
                debug!("rejected inbound connection: peer_addr={peer_addr}, max_connections={max}");
            }
            Err(e) => {
                warn!("failed to register inbound connection: error={e}, peer_addr={peer_addr}");
            }
        }
    });
}
