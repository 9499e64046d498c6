//! Routing and fan-out.
//!
//! Dispatch runs on the sender's session task. Targets are resolved from
//! the registry, then written one at a time in name order:
//!
//! - Text: lock a target, write the frame, flush, unlock, next target.
//! - File: lock every target in name order, write the header to each, then
//!   read the payload from the sender once, chunk by chunk, writing every
//!   chunk to every target still healthy. Locks are held until the last
//!   byte is flushed so nothing interleaves with the payload.
//!
//! A failing target is dropped from the fan-out and reported; the others
//! carry on. A failing *sender* stream aborts the transfer, and recipients
//! left holding a partial payload are shut down since their stream can no
//! longer be parsed.

use std::sync::Arc;
use std::time::Duration;

use schat_protocol::{Message, MessageKind, Routing};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::outbound::OutboundGuard;
use crate::registry::{Recipient, SessionRegistry};

/// Outcome of one dispatch, by recipient name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    /// Unicast recipients that are not registered.
    pub missing: Vec<String>,
}

impl DeliveryReport {
    /// True iff every resolved recipient received the whole message.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

/// Failures that end the sender's session.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} is not a routed message kind")]
    NotRouted(MessageKind),

    #[error("sender stream failed mid-transfer: {0}")]
    SourceRead(#[source] std::io::Error),

    #[error("sender stream ended {remaining} bytes short of the declared payload")]
    Truncated { remaining: u64 },
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    metrics: Arc<ServerMetrics>,
    lock_timeout: Duration,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        metrics: Arc<ServerMetrics>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            lock_timeout: config.lock_timeout,
            chunk_size: config.chunk_size,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route `msg` from the registered session `sender`.
    ///
    /// For file kinds, exactly `payload_size` bytes are consumed from
    /// `source`, whether or not anyone receives them.
    pub async fn dispatch<R>(
        &self,
        sender: &str,
        msg: &Message,
        source: &mut R,
    ) -> Result<DeliveryReport, DispatchError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let routing = msg.kind.routing().ok_or(DispatchError::NotRouted(msg.kind))?;
        let (targets, missing) = self.resolve(sender, routing, &msg.to).await;
        let outgoing = msg.for_delivery(sender);

        let mut report = if msg.kind.is_file() {
            self.relay_file(&outgoing, &targets, source).await?
        } else {
            self.deliver_text(&outgoing, &targets).await
        };
        report.missing = missing;

        self.metrics
            .record_deliveries(report.delivered.len(), report.failed.len() + report.missing.len());
        debug!(
            sender,
            kind = %msg.kind,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            missing = report.missing.len(),
            "dispatched"
        );
        Ok(report)
    }

    /// Resolve recipients, sorted by name. Returns (targets, missing names).
    async fn resolve(
        &self,
        sender: &str,
        routing: Routing,
        to: &[String],
    ) -> (Vec<Recipient>, Vec<String>) {
        match routing {
            Routing::Unicast => {
                let Some(name) = to.first() else {
                    return (Vec::new(), Vec::new());
                };
                match self.registry.lookup(name).await {
                    Some(outbound) => (
                        vec![Recipient {
                            name: name.clone(),
                            outbound,
                        }],
                        Vec::new(),
                    ),
                    None => (Vec::new(), vec![name.clone()]),
                }
            }
            Routing::Broadcast => (self.registry.all_except(&[sender]).await, Vec::new()),
            Routing::Blockcast => {
                let mut excluded: Vec<&str> = to.iter().map(String::as_str).collect();
                excluded.push(sender);
                (self.registry.all_except(&excluded).await, Vec::new())
            }
        }
    }

    async fn deliver_text(&self, outgoing: &Message, targets: &[Recipient]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for target in targets {
            match target.outbound.send(outgoing, self.lock_timeout).await {
                Ok(()) => report.delivered.push(target.name.clone()),
                Err(e) => {
                    warn!(recipient = %target.name, error = %e, "text delivery failed");
                    report.failed.push(target.name.clone());
                }
            }
        }
        report
    }

    async fn relay_file<R>(
        &self,
        header: &Message,
        targets: &[Recipient],
        source: &mut R,
    ) -> Result<DeliveryReport, DispatchError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let size = header.payload_len();
        let mut report = DeliveryReport::default();

        // Phase 1: lock in name order and announce the payload.
        let mut live: Vec<(&str, OutboundGuard<'_>)> = Vec::with_capacity(targets.len());
        for target in targets {
            let sent = match target.outbound.lock(self.lock_timeout).await {
                Ok(mut guard) => guard.send(header).await.map(|()| guard),
                Err(e) => Err(e),
            };
            match sent {
                Ok(guard) => live.push((target.name.as_str(), guard)),
                Err(e) => {
                    warn!(recipient = %target.name, error = %e, "file header delivery failed");
                    report.failed.push(target.name.clone());
                }
            }
        }

        // Phase 2: single pass over the source, each chunk to every live target.
        let mut buf = vec![0u8; self.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let read = match source.read(&mut buf[..want]).await {
                Ok(0) => Err(DispatchError::Truncated { remaining }),
                Ok(n) => Ok(n),
                Err(e) => Err(DispatchError::SourceRead(e)),
            };
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, recipients = live.len(), "file relay aborted");
                    for (_, guard) in live {
                        guard.abandon().await;
                    }
                    return Err(e);
                }
            };

            let chunk = &buf[..n];
            let mut i = 0;
            while i < live.len() {
                match live[i].1.write_all(chunk).await {
                    Ok(()) => i += 1,
                    Err(e) => {
                        let (name, _) = live.remove(i);
                        warn!(recipient = name, error = %e, "file payload delivery failed");
                        report.failed.push(name.to_string());
                    }
                }
            }
            remaining -= n as u64;
        }

        for (name, mut guard) in live {
            match guard.flush().await {
                Ok(()) => report.delivered.push(name.to_string()),
                Err(e) => {
                    warn!(recipient = name, error = %e, "file flush failed");
                    report.failed.push(name.to_string());
                }
            }
        }

        if !report.delivered.is_empty() {
            self.metrics.file_relayed(size);
        }
        Ok(report)
    }
}
