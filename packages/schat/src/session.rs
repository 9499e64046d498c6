//! Server side of one connection: handshake, then the steady-state read loop.
//!
//! The session task owns the read half of its connection. Everything it
//! writes (acks, notices, timeouts) goes through its own [`Outbound`], the
//! same handle other sessions use to relay traffic to it, so replies and
//! relayed frames never interleave.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use schat_protocol::{FrameError, Message, MessageKind, read_frame, validate_display_name};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::metrics::ServerMetrics;
use crate::outbound::{DeliveryError, Outbound};
use crate::registry::SessionRegistry;

/// Shared server state handed to every session.
pub struct RelayContext {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<ServerMetrics>,
    pub config: Arc<ServerConfig>,
}

impl RelayContext {
    pub fn new(
        config: ServerConfig,
        registry: Arc<SessionRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry.clone(), metrics.clone(), &config);
        Self {
            registry,
            dispatcher,
            metrics,
            config: Arc::new(config),
        }
    }
}

/// Server-side session state. `Registered` sessions are in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered(String),
    Closed,
}

/// Failures that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("reply failed: {0}")]
    Reply(#[from] DeliveryError),

    #[error("stream ended {remaining} bytes into a payload it was draining")]
    TruncatedDrain { remaining: u64 },
}

#[derive(Debug)]
pub enum CloseReason {
    Quit,
    /// The client announced its own timeout.
    ClientTimeout,
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// Peer closed the stream at a frame boundary.
    Disconnected,
    /// The server is stopping.
    Shutdown,
    Failed(SessionError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quit => f.write_str("quit"),
            Self::ClientTimeout => f.write_str("client timeout"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

enum Step {
    Continue,
    Close(CloseReason),
}

pub struct Session<R> {
    id: Uuid,
    reader: BufReader<R>,
    outbound: Arc<Outbound>,
    ctx: Arc<RelayContext>,
    state: SessionState,
    shutdown: CancellationToken,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(ctx: Arc<RelayContext>, reader: R, outbound: Arc<Outbound>) -> Self {
        Self {
            id: outbound.connection_id(),
            reader: BufReader::new(reader),
            outbound,
            ctx,
            state: SessionState::Connected,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop reading and close once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Serve the connection until it closes. Always leaves the registry
    /// without this session's name and the outbound shut down.
    pub async fn run(mut self) -> CloseReason {
        self.ctx.metrics.connection_opened();
        debug!(connection_id = %self.id, "session started");

        let reason = self.serve().await;
        let farewell = match reason {
            CloseReason::IdleTimeout => {
                let idle = self.ctx.config.idle_timeout.unwrap_or_default();
                Some(Message::timeout(format!("idle for {}s", idle.as_secs())))
            }
            CloseReason::Shutdown => Some(Message::notice("server shutting down")),
            _ => None,
        };
        if let Some(msg) = farewell {
            if let Err(e) = self.reply(&msg).await {
                debug!(error = %e, "could not send farewell");
            }
        }
        self.close(&reason).await;

        self.ctx.metrics.connection_closed();
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            let read = read_frame(&mut self.reader);
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return CloseReason::Shutdown,
                r = within(self.ctx.config.idle_timeout, read) => match r {
                    Some(r) => r,
                    None => return CloseReason::IdleTimeout,
                },
            };

            let step = match next {
                Ok(None) => return CloseReason::Disconnected,
                Ok(Some(msg)) => {
                    self.ctx.metrics.frame_received();
                    self.handle(msg).await
                }
                Err(e) if e.is_recoverable() => self
                    .reply(&Message::notice(format!("frame ignored: {e}")))
                    .await
                    .map(|()| Step::Continue),
                Err(e) => return CloseReason::Failed(e.into()),
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Close(reason)) => return reason,
                Err(e) => return CloseReason::Failed(e),
            }
        }
    }

    async fn handle(&mut self, msg: Message) -> Result<Step, SessionError> {
        if msg.kind == MessageKind::Introduction {
            if msg.payload_size.is_some() {
                return self.reject(&msg, "Introduction cannot carry a payload").await;
            }
            return self.introduce(&msg.from).await;
        }
        if let Err(e) = msg.validate() {
            return self.reject(&msg, &e.to_string()).await;
        }

        match msg.kind {
            MessageKind::Quit => Ok(Step::Close(CloseReason::Quit)),
            MessageKind::Timeout => Ok(Step::Close(CloseReason::ClientTimeout)),
            MessageKind::IntroAck | MessageKind::Notice => {
                let reason = format!("{} is only sent by the server", msg.kind);
                self.reject(&msg, &reason).await
            }
            _ => self.route(msg).await,
        }
    }

    async fn introduce(&mut self, name: &str) -> Result<Step, SessionError> {
        let lock_timeout = self.ctx.config.lock_timeout;

        if let SessionState::Registered(current) = &self.state {
            let notice = Message::notice(format!("already registered as {current}"));
            self.reply(&notice).await?;
            return Ok(Step::Continue);
        }

        // Hold our own write lock across the claim: once the name is visible
        // other sessions may relay to us, and the ack has to go out first.
        let mut guard = match self.outbound.lock(lock_timeout).await {
            Ok(guard) => guard,
            Err(DeliveryError::LockTimeout) => {
                warn!(name, "write lock busy, introduction dropped");
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = validate_display_name(name) {
            self.ctx.metrics.name_conflict();
            guard
                .send(&Message::notice(format!("name {name:?} rejected: {e}")))
                .await?;
            guard.send(&Message::intro_ack(false)).await?;
            guard.flush().await?;
            return Ok(Step::Continue);
        }

        let accepted = self.ctx.registry.try_claim(name, self.outbound.clone()).await;
        if accepted {
            self.state = SessionState::Registered(name.to_string());
            info!(name, "registered");
        } else {
            self.ctx.metrics.name_conflict();
            debug!(name, "name taken");
        }
        guard.send(&Message::intro_ack(accepted)).await?;
        guard.flush().await?;
        Ok(Step::Continue)
    }

    async fn route(&mut self, msg: Message) -> Result<Step, SessionError> {
        let SessionState::Registered(name) = &self.state else {
            return self
                .reject(&msg, "introduce yourself before sending messages")
                .await;
        };

        let report = self
            .ctx
            .dispatcher
            .dispatch(name, &msg, &mut self.reader)
            .await?;

        if !report.missing.is_empty() {
            let notice = Message::notice(format!("no such user: {}", report.missing.join(", ")));
            self.reply(&notice).await?;
        }
        Ok(Step::Continue)
    }

    /// Answer with a notice and skip any payload so the stream stays aligned.
    async fn reject(&mut self, msg: &Message, reason: &str) -> Result<Step, SessionError> {
        warn!(kind = %msg.kind, reason, "rejected frame");
        self.reply(&Message::notice(reason)).await?;
        self.drain(msg.payload_len()).await?;
        Ok(Step::Continue)
    }

    async fn drain(&mut self, len: u64) -> Result<(), SessionError> {
        if len == 0 {
            return Ok(());
        }
        let mut payload = (&mut self.reader).take(len);
        let drained = tokio::io::copy(&mut payload, &mut tokio::io::sink())
            .await
            .map_err(FrameError::from)?;
        if drained < len {
            return Err(SessionError::TruncatedDrain {
                remaining: len - drained,
            });
        }
        Ok(())
    }

    /// Send a server frame to our own client. A lock that stays busy means
    /// another session is mid-relay to us; the frame is dropped and the
    /// session carries on. Only a failed stream is fatal.
    async fn reply(&self, msg: &Message) -> Result<(), SessionError> {
        match self.outbound.send(msg, self.ctx.config.lock_timeout).await {
            Ok(()) => Ok(()),
            Err(DeliveryError::LockTimeout) => {
                warn!(kind = %msg.kind, "write lock busy, reply dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self, reason: &CloseReason) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Registered(name) = state {
            self.ctx.registry.release_owned(&name, &self.outbound).await;
            info!(name, %reason, "session closed");
        } else {
            debug!(%reason, "unregistered session closed");
        }
        self.outbound.close(self.ctx.config.lock_timeout).await;
    }
}

/// `None` if `limit` elapses first.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}
