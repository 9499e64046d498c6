//! The write side of one connection.
//!
//! Every byte sent to a client goes through its `Outbound`: the session's
//! own replies, text relayed by other sessions, and raw file payloads. The
//! writer sits behind a tokio `Mutex` so that a header frame and the payload
//! bytes that follow it land on the wire as one uninterrupted unit.
//!
//! A write that fails or times out may have left a partial frame on the
//! wire. From then on the stream cannot be resynchronized, so the outbound
//! is marked broken and shut down; later deliveries fail fast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use schat_protocol::{FrameError, Message, encode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why bytes did not reach a recipient.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("timed out waiting for the recipient's write lock")]
    LockTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("connection already failed")]
    Broken,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub struct Outbound {
    connection_id: Uuid,
    writer: Mutex<BoxedWriter>,
    broken: AtomicBool,
    write_timeout: Duration,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("connection_id", &self.connection_id)
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl Outbound {
    pub fn new<W>(connection_id: Uuid, writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            connection_id,
            writer: Mutex::new(Box::new(writer)),
            broken: AtomicBool::new(false),
            write_timeout,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Take exclusive write access, waiting at most `timeout`.
    pub async fn lock(&self, timeout: Duration) -> Result<OutboundGuard<'_>, DeliveryError> {
        if self.is_broken() {
            return Err(DeliveryError::Broken);
        }
        let writer = tokio::time::timeout(timeout, self.writer.lock())
            .await
            .map_err(|_| DeliveryError::LockTimeout)?;
        if self.is_broken() {
            return Err(DeliveryError::Broken);
        }
        Ok(OutboundGuard {
            owner: self,
            writer,
        })
    }

    /// Lock, write one frame, flush.
    pub async fn send(&self, msg: &Message, lock_timeout: Duration) -> Result<(), DeliveryError> {
        let mut guard = self.lock(lock_timeout).await?;
        guard.send(msg).await?;
        guard.flush().await
    }

    /// Mark broken and shut the writer down so the peer sees end-of-stream.
    pub async fn close(&self, lock_timeout: Duration) {
        self.broken.store(true, Ordering::Release);
        if let Ok(mut writer) = tokio::time::timeout(lock_timeout, self.writer.lock()).await {
            let _ = tokio::time::timeout(self.write_timeout, writer.shutdown()).await;
        }
    }
}

/// Exclusive write access to one [`Outbound`]. Dropping it releases the lock.
pub struct OutboundGuard<'a> {
    owner: &'a Outbound,
    writer: MutexGuard<'a, BoxedWriter>,
}

impl OutboundGuard<'_> {
    pub async fn send(&mut self, msg: &Message) -> Result<(), DeliveryError> {
        let frame = encode(msg)?;
        self.write_all(&frame).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), DeliveryError> {
        if self.owner.is_broken() {
            return Err(DeliveryError::Broken);
        }
        let result = tokio::time::timeout(self.owner.write_timeout, self.writer.write_all(bytes)).await;
        self.settle(result).await
    }

    pub async fn flush(&mut self) -> Result<(), DeliveryError> {
        if self.owner.is_broken() {
            return Err(DeliveryError::Broken);
        }
        let result = tokio::time::timeout(self.owner.write_timeout, self.writer.flush()).await;
        self.settle(result).await
    }

    /// Give up mid-payload: the peer holds a partial unit it cannot parse.
    pub async fn abandon(mut self) {
        self.owner.broken.store(true, Ordering::Release);
        let _ = tokio::time::timeout(self.owner.write_timeout, self.writer.shutdown()).await;
    }

    async fn settle(
        &mut self,
        result: Result<std::io::Result<()>, tokio::time::error::Elapsed>,
    ) -> Result<(), DeliveryError> {
        let err = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => DeliveryError::Io(e),
            Err(_) => DeliveryError::WriteTimeout,
        };
        debug!(connection_id = %self.owner.connection_id, error = %err, "outbound broken");
        self.owner.broken.store(true, Ordering::Release);
        let _ = tokio::time::timeout(self.owner.write_timeout, self.writer.shutdown()).await;
        Err(err)
    }
}
