//! Interactive terminal client.
//!
//! Stdin is read on a plain thread and fed through a channel; the
//! connection is split so the sender and receiver halves run side by side.

pub mod downloads;
pub mod handshake;
pub mod receiver;
pub mod sender;

use std::io::BufRead;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ClientConfig;
use downloads::DownloadStore;
use handshake::negotiate_name;
use receiver::{ReceiveEnd, receive_loop};
use sender::send_loop;

/// Connect to `addr` and chat until the user quits or the server hangs up.
pub async fn run_client(config: ClientConfig, username: String, addr: &str) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;
    stream
        .set_nodelay(true)
        .context("Failed to set TCP_NODELAY")?;
    info!(%addr, "connected");

    let mut lines = spawn_stdin_reader();
    chat(stream, &config, username, &mut lines).await
}

/// Run one chat session over `stream` with user input from `lines`.
pub async fn chat<S>(
    stream: S,
    config: &ClientConfig,
    username: String,
    lines: &mut mpsc::Receiver<String>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut stdout = std::io::stdout();

    let Some(name) = negotiate_name(&mut reader, &mut writer, lines, username, &mut stdout).await?
    else {
        return Ok(());
    };
    println!("joined as {name}. Type /quit to leave.");

    let store = DownloadStore::new(config.user_download_dir(&name));
    let mut inbound = tokio::spawn(async move {
        receive_loop(&mut reader, &store, &mut std::io::stdout()).await
    });

    tokio::select! {
        sent = send_loop(&mut writer, lines, &mut stdout) => {
            sent?;
            inbound.abort();
        }
        received = &mut inbound => {
            match received.context("receiver task failed")?? {
                ReceiveEnd::Closed => println!("server closed the connection"),
                ReceiveEnd::TimedOut => debug!("timed out by server"),
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Forward stdin lines to the async side. The thread ends with stdin or
/// once the receiver is dropped.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::metrics::ServerMetrics;
    use crate::registry::SessionRegistry;
    use crate::server::RelayServer;
    use crate::test_helpers::test_config;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn start_server(config: ServerConfig) -> (String, Arc<SessionRegistry>, CancellationToken) {
        let registry = Arc::new(SessionRegistry::new());
        let server = RelayServer::bind(config, registry.clone(), Arc::new(ServerMetrics::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (addr, registry, cancel)
    }

    async fn wait_for(registry: &SessionRegistry, names: &[&str]) {
        for _ in 0..200 {
            if registry.names().await == names {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {names:?}");
    }

    #[tokio::test]
    async fn file_reaches_the_recipients_download_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            download_dir: dir.path().join("download"),
        };
        let (addr, registry, cancel) = start_server(test_config()).await;

        let (bob_tx, mut bob_lines) = mpsc::channel(8);
        let bob_stream = TcpStream::connect(addr.as_str()).await.unwrap();
        let bob_config = config.clone();
        let bob = tokio::spawn(async move {
            chat(bob_stream, &bob_config, "bob".into(), &mut bob_lines).await
        });
        wait_for(&registry, &["bob"]).await;

        let upload = dir.path().join("hello.txt");
        std::fs::write(&upload, b"hi bob").unwrap();

        let (alice_tx, mut alice_lines) = mpsc::channel(8);
        alice_tx
            .send(format!("/file @bob {}", upload.display()))
            .await
            .unwrap();
        alice_tx.send("/quit".into()).await.unwrap();
        let alice_stream = TcpStream::connect(addr.as_str()).await.unwrap();
        chat(alice_stream, &config, "alice".into(), &mut alice_lines)
            .await
            .unwrap();

        let saved = dir.path().join("download/bob/hello.txt");
        for _ in 0..200 {
            if std::fs::read(&saved).map(|b| b == b"hi bob").unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read(&saved).unwrap(), b"hi bob");

        drop(bob_tx);
        bob.await.unwrap().unwrap();
        wait_for(&registry, &[]).await;
        cancel.cancel();
    }
}
