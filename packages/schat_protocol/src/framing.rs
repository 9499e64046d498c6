//! Length-prefixed JSON frames.
//!
//! Wire format: `[4-byte big-endian length][JSON message]`
//!
//! A file-kind frame is followed by exactly `payload_size` raw bytes with no
//! further framing, so readers must not buffer past a frame they have not
//! finished handling.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::message::Message;

/// Maximum frame size (1 MiB). Larger declared lengths are rejected.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Upper bound on the chunk size used when copying raw payload bytes.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024;

const LEN_PREFIX: usize = 4;

/// Serialize a message into a complete frame, length prefix included.
pub fn encode(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            len: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + json.len());
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Parse one complete frame produced by [`encode`].
pub fn decode(frame: &[u8]) -> Result<Message, FrameError> {
    if frame.len() < LEN_PREFIX {
        return Err(FrameError::Malformed(format!(
            "frame shorter than its length prefix ({} bytes)",
            frame.len()
        )));
    }
    let (prefix, json) = frame.split_at(LEN_PREFIX);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len != json.len() {
        return Err(FrameError::Malformed(format!(
            "length prefix says {} bytes, frame carries {}",
            len,
            json.len()
        )));
    }
    Ok(serde_json::from_slice(json)?)
}

/// Write one frame. Does not flush.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `None` if the peer closed the stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    match serde_json::from_slice(&buf) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            tracing::warn!(error = %e, len, "undecodable frame");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn file_message() -> Message {
        Message {
            kind: MessageKind::FileUnicast,
            from: "alice".into(),
            to: vec!["bob".into()],
            body: "report.txt".into(),
            payload_size: Some(5),
        }
    }

    #[test]
    fn frame_layout() {
        let frame = encode(&Message::quit()).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let json: serde_json::Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(json["kind"], "Quit");
        assert!(json.get("payload_size").is_none());
        assert!(json.get("to").is_none());
    }

    #[test]
    fn decode_rejects_bad_prefix() {
        let mut frame = encode(&Message::quit()).unwrap();
        frame.push(b' ');
        assert!(matches!(decode(&frame), Err(FrameError::Malformed(_))));
        assert!(matches!(decode(&[0, 0]), Err(FrameError::Malformed(_))));
    }

    #[tokio::test]
    async fn frame_then_raw_payload_share_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &file_message()).await.unwrap();
        a.write_all(b"hello").await.unwrap();
        write_frame(&mut a, &Message::quit()).await.unwrap();
        drop(a);

        let header = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(header, file_message());
        let mut payload = vec![0u8; header.payload_len() as usize];
        b.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().kind, MessageKind::Quit);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn undecodable_frame_keeps_alignment() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let junk = b"{not json";
        a.write_all(&(junk.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(junk).await.unwrap();
        write_frame(&mut a, &Message::quit()).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap().kind, MessageKind::Quit);
    }
}
