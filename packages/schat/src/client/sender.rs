//! Outbound half of the client: stdin lines to frames.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use schat_protocol::{MAX_CHUNK_SIZE, Message, MessageKind, parse_line, write_frame};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Forward user input until `/quit` or end of input, then send Quit.
pub async fn send_loop<W, O>(
    writer: &mut W,
    lines: &mut mpsc::Receiver<String>,
    out: &mut O,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    O: Write,
{
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        let msg = match parse_line(&line) {
            Ok(msg) => msg,
            Err(e) => {
                writeln!(out, "warning: {e}")?;
                continue;
            }
        };

        match msg.kind {
            MessageKind::Quit => break,
            kind if kind.is_file() => {
                let path = msg.body.clone();
                match open_upload(Path::new(&path)).await {
                    Ok((file, len)) => send_file(writer, msg, file, len).await?,
                    Err(e) => writeln!(out, "warning: {e:#}")?,
                }
            }
            _ => {
                write_frame(writer, &msg).await?;
                writer.flush().await?;
            }
        }
    }

    debug!("sending quit");
    write_frame(writer, &Message::quit()).await?;
    writer.flush().await?;
    Ok(())
}

async fn open_upload(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let meta = file
        .metadata()
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    Ok((file, meta.len()))
}

/// Send `header` as a file frame followed by exactly `len` bytes of `file`.
///
/// The header's body is reduced to the file's own name; recipients never
/// see the sender's directory layout.
pub async fn send_file<W, F>(writer: &mut W, mut header: Message, mut file: F, len: u64) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: AsyncRead + Unpin,
{
    if let Some(name) = Path::new(&header.body).file_name().and_then(|n| n.to_str()) {
        header.body = name.to_string();
    }
    header.payload_size = Some(len);
    write_frame(writer, &header).await?;

    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            // The header already promised `len` bytes; the stream is lost.
            bail!("file shrank while sending, {remaining} bytes short");
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    writer.flush().await?;
    debug!(file = %header.body, len, "file sent");
    Ok(())
}
