//! Connection acceptor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::outbound::Outbound;
use crate::registry::SessionRegistry;
use crate::session::{RelayContext, Session};

pub struct RelayServer {
    listener: TcpListener,
    ctx: Arc<RelayContext>,
    permits: Arc<Semaphore>,
    /// Size of the worker pool, `max_connections` clamped to what a
    /// semaphore can hold.
    pool_size: u32,
}

impl RelayServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(
        config: ServerConfig,
        registry: Arc<SessionRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let pool_size = pool_size(config.max_connections);
        Ok(Self {
            listener,
            ctx: Arc::new(RelayContext::new(config, registry, metrics)),
            permits: Arc::new(Semaphore::new(pool_size as usize)),
            pool_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Listener has no local address")
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Accept connections until `cancel` fires. Sessions still open at that
    /// point are told to shut down, and are given a grace period to finish.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_connections = self.ctx.config.max_connections,
            "schat relay listening"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("accept loop cancelled");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    self.spawn_session(stream, peer, cancel.child_token());
                }
            }
        }

        // Every permit back means every session has finished.
        let grace = self.ctx.config.lock_timeout + self.ctx.config.write_timeout;
        if tokio::time::timeout(grace, self.permits.acquire_many(self.pool_size))
            .await
            .is_err()
        {
            warn!(?grace, "sessions still open after shutdown grace period");
        }
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, "failed to set TCP_NODELAY: {}", e);
        }

        let connection_id = Uuid::new_v4();
        let ctx = self.ctx.clone();
        let permits = self.permits.clone();
        let span = info_span!("session", %connection_id, %peer);

        tokio::spawn(
            async move {
                // Wait for a worker slot; the socket stays open meanwhile.
                let _permit = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                };
                debug!("connection accepted");

                let (reader, writer) = stream.into_split();
                let outbound = Arc::new(Outbound::new(
                    connection_id,
                    writer,
                    ctx.config.write_timeout,
                ));
                let reason = Session::new(ctx, reader, outbound)
                    .with_shutdown(shutdown)
                    .run()
                    .await;
                debug!(%reason, "connection finished");
            }
            .instrument(span),
        );
    }
}

/// `acquire_many` takes a `u32`, so the pool never exceeds what both it and
/// the semaphore accept.
fn pool_size(max_connections: usize) -> u32 {
    let cap = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
    u32::try_from(max_connections.min(cap)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_config;
    use schat_protocol::{Message, MessageKind, parse_line, read_frame, write_frame};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start(config: ServerConfig) -> (SocketAddr, Arc<RelayContext>, CancellationToken) {
        let server = RelayServer::bind(
            config,
            Arc::new(SessionRegistry::new()),
            Arc::new(ServerMetrics::new()),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = server.context().clone();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (addr, ctx, cancel)
    }

    async fn join(addr: SocketAddr, name: &str) -> (TcpStream, Message) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &Message::introduction(name)).await.unwrap();
        let ack = next(&mut stream).await;
        (stream, ack)
    }

    async fn next(stream: &mut TcpStream) -> Message {
        tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn names_are_unique_across_connections() {
        let (addr, ctx, cancel) = start(test_config()).await;

        let (_alice, ack) = join(addr, "alice").await;
        assert!(ack.is_accepted());
        let (_other, ack) = join(addr, "alice").await;
        assert!(!ack.is_accepted());

        assert_eq!(ctx.registry.names().await, vec!["alice"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn file_relay_over_tcp() {
        let (addr, _ctx, cancel) = start(test_config()).await;
        let (mut alice, _) = join(addr, "alice").await;
        let (mut bob, _) = join(addr, "bob").await;

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut header = parse_line("/file @bob data.bin").unwrap();
        header.payload_size = Some(payload.len() as u64);
        write_frame(&mut alice, &header).await.unwrap();
        alice.write_all(&payload).await.unwrap();

        let got = next(&mut bob).await;
        assert_eq!(got.kind, MessageKind::FileUnicast);
        assert_eq!(got.from, "alice");
        assert_eq!(got.payload_size, Some(payload.len() as u64));
        let mut received = vec![0u8; payload.len()];
        bob.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);

        // The stream is still aligned for the next frame.
        write_frame(&mut alice, &parse_line("/text @bob done").unwrap())
            .await
            .unwrap();
        assert_eq!(next(&mut bob).await.body, "done");
        cancel.cancel();
    }

    #[tokio::test]
    async fn excess_connections_wait_for_a_slot() {
        let config = ServerConfig {
            max_connections: 1,
            ..test_config()
        };
        let (addr, _ctx, cancel) = start(config).await;

        let (mut first, ack) = join(addr, "first").await;
        assert!(ack.is_accepted());

        let mut second = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut second, &Message::introduction("second"))
            .await
            .unwrap();
        let early = tokio::time::timeout(Duration::from_millis(100), read_frame(&mut second)).await;
        assert!(early.is_err(), "second session started before a slot freed");

        write_frame(&mut first, &Message::quit()).await.unwrap();
        assert!(next(&mut second).await.is_accepted());
        cancel.cancel();
    }

    #[test]
    fn pool_size_is_clamped_to_the_semaphore() {
        assert_eq!(pool_size(8), 8);
        let huge = pool_size(usize::MAX);
        assert!(huge as usize <= Semaphore::MAX_PERMITS);
    }

    #[tokio::test]
    async fn shutdown_returns_promptly_with_an_oversized_pool() {
        let config = ServerConfig {
            max_connections: usize::MAX,
            ..test_config()
        };
        let server = RelayServer::bind(
            config,
            Arc::new(SessionRegistry::new()),
            Arc::new(ServerMetrics::new()),
        )
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(server.run(cancel.clone()));
        cancel.cancel();
        // The grace period is four seconds in tests; an idle pool is back at once.
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("shutdown waited out the grace period")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_accepting_and_closes_sessions() {
        let (addr, ctx, cancel) = start(test_config()).await;
        let (mut alice, _) = join(addr, "alice").await;

        cancel.cancel();
        let notice = next(&mut alice).await;
        assert_eq!(notice.kind, MessageKind::Notice);
        assert!(read_frame(&mut alice).await.unwrap().is_none());
        // The name is released before the connection is shut down.
        assert!(ctx.registry.is_empty().await);
        assert_eq!(ctx.metrics.snapshot().total_connections, 1);
    }
}
