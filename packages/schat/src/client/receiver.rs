//! Inbound half of the client: frames to the terminal and the download store.

use std::io::Write;

use anyhow::Result;
use chrono::Local;
use schat_protocol::{Message, MessageKind, read_frame};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use super::downloads::DownloadStore;

/// Why the inbound stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEnd {
    /// Server closed the connection.
    Closed,
    /// Server dropped us for inactivity.
    TimedOut,
}

/// One-line rendering of a relayed text message (no timestamp).
pub fn render_text(msg: &Message) -> String {
    match msg.kind {
        MessageKind::TextUnicast => format!("{} (private): {}", msg.from, msg.body),
        MessageKind::TextBlockcast => format!("{} (blockcast): {}", msg.from, msg.body),
        _ => format!("{}: {}", msg.from, msg.body),
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub async fn receive_loop<R, O>(reader: &mut R, store: &DownloadStore, out: &mut O) -> Result<ReceiveEnd>
where
    R: AsyncRead + Unpin,
    O: Write,
{
    while let Some(msg) = read_frame(reader).await? {
        match msg.kind {
            kind if kind.is_text() => writeln!(out, "[{}] {}", stamp(), render_text(&msg))?,
            kind if kind.is_file() => {
                let len = msg.payload_len();
                match store.save(&msg.body, reader, len).await {
                    Ok(path) => writeln!(
                        out,
                        "[{}] {} sent {} ({len} bytes), saved to {}",
                        stamp(),
                        msg.from,
                        msg.body,
                        path.display()
                    )?,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!(error = %e, "could not save download");
                        writeln!(out, "[{}] could not save {} from {}: {e}", stamp(), msg.body, msg.from)?;
                    }
                }
            }
            MessageKind::Notice => writeln!(out, "[{}] * {}", stamp(), msg.body)?,
            MessageKind::Timeout => {
                writeln!(out, "[{}] disconnected by server: {}", stamp(), msg.body)?;
                return Ok(ReceiveEnd::TimedOut);
            }
            MessageKind::Quit => break,
            other => debug!(kind = %other, "ignoring frame"),
        }
        out.flush()?;
    }
    Ok(ReceiveEnd::Closed)
}
