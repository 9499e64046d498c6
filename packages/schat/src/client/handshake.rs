//! Client side of the name handshake.

use std::io::Write;

use anyhow::{Result, bail};
use schat_protocol::{Message, MessageKind, read_frame, validate_display_name, write_frame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connected,
    AwaitingNameAck,
    Registered,
    Closed,
}

/// Claim a display name, prompting on `lines` for another one whenever the
/// server rejects it or it fails the local name rules.
///
/// Returns the registered name, or `None` if input ran out first.
pub async fn negotiate_name<R, W, O>(
    reader: &mut R,
    writer: &mut W,
    lines: &mut mpsc::Receiver<String>,
    requested: String,
    out: &mut O,
) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    O: Write,
{
    let mut candidate = requested;
    let mut state = HandshakeState::Connected;

    loop {
        state = match state {
            HandshakeState::Connected => match validate_display_name(&candidate) {
                Err(e) => {
                    writeln!(out, "'{candidate}' cannot be used: {e}")?;
                    next_candidate(lines, &mut candidate, out).await?
                }
                Ok(()) => {
                    write_frame(writer, &Message::introduction(&candidate)).await?;
                    writer.flush().await?;
                    HandshakeState::AwaitingNameAck
                }
            },
            HandshakeState::AwaitingNameAck => {
                let Some(msg) = read_frame(reader).await? else {
                    bail!("server closed the connection during the handshake");
                };
                match msg.kind {
                    MessageKind::IntroAck if msg.is_accepted() => HandshakeState::Registered,
                    MessageKind::IntroAck => {
                        writeln!(out, "the name '{candidate}' was not accepted")?;
                        next_candidate(lines, &mut candidate, out).await?
                    }
                    MessageKind::Notice => {
                        writeln!(out, "* {}", msg.body)?;
                        HandshakeState::AwaitingNameAck
                    }
                    MessageKind::Timeout => {
                        writeln!(out, "disconnected: {}", msg.body)?;
                        HandshakeState::Closed
                    }
                    other => {
                        debug!(kind = %other, "ignoring frame before registration");
                        HandshakeState::AwaitingNameAck
                    }
                }
            }
            HandshakeState::Registered => return Ok(Some(candidate)),
            HandshakeState::Closed => return Ok(None),
        };
    }
}

async fn next_candidate<O: Write>(
    lines: &mut mpsc::Receiver<String>,
    candidate: &mut String,
    out: &mut O,
) -> Result<HandshakeState> {
    write!(out, "choose another name: ")?;
    out.flush()?;
    Ok(match lines.recv().await {
        Some(line) => {
            *candidate = line.trim().to_string();
            HandshakeState::Connected
        }
        None => HandshakeState::Closed,
    })
}
