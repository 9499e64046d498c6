//! Shared fixtures for relay tests: in-memory sessions over duplex pipes.

use std::sync::Arc;
use std::time::Duration;

use schat_protocol::{Message, MessageKind, read_frame, write_frame};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::outbound::Outbound;
use crate::registry::SessionRegistry;
use crate::session::{CloseReason, RelayContext, Session};

const PIPE: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        idle_timeout: None,
        write_timeout: Duration::from_secs(2),
        lock_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

pub fn test_context(config: ServerConfig) -> Arc<RelayContext> {
    Arc::new(RelayContext::new(
        config,
        Arc::new(SessionRegistry::new()),
        Arc::new(ServerMetrics::new()),
    ))
}

/// Register `name` directly, bypassing the handshake. Returns the peer end.
pub async fn attach(registry: &SessionRegistry, name: &str, capacity: usize) -> DuplexStream {
    let (server_end, client_end) = tokio::io::duplex(capacity);
    let outbound = Arc::new(Outbound::new(
        Uuid::new_v4(),
        server_end,
        Duration::from_secs(2),
    ));
    assert!(registry.try_claim(name, outbound).await, "{name} already taken");
    client_end
}

/// Start a session task over an in-memory pipe. Returns the client end.
pub fn spawn_session(ctx: &Arc<RelayContext>) -> (DuplexStream, JoinHandle<CloseReason>) {
    let (client_end, server_end) = tokio::io::duplex(PIPE);
    let (reader, writer) = tokio::io::split(server_end);
    let outbound = Arc::new(Outbound::new(
        Uuid::new_v4(),
        writer,
        ctx.config.write_timeout,
    ));
    let session = Session::new(ctx.clone(), reader, outbound);
    (client_end, tokio::spawn(session.run()))
}

/// Send an Introduction and return the IntroAck.
pub async fn introduce(client: &mut DuplexStream, name: &str) -> Message {
    write_frame(client, &Message::introduction(name)).await.unwrap();
    let ack = expect_frame(client).await;
    assert_eq!(ack.kind, MessageKind::IntroAck);
    ack
}

pub async fn expect_frame(client: &mut DuplexStream) -> Message {
    tokio::time::timeout(WAIT, read_frame(client))
        .await
        .expect("timed out waiting for a frame")
        .expect("frame error")
        .expect("stream closed")
}
