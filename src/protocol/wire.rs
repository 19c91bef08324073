//! Framed message I/O
//!
//! Reads and writes length-prefixed wire messages over any async stream.
//! The length prefix is bound-checked before the payload buffer is
//! allocated; a peer announcing an absurd frame is a session error, not an
//! allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::Error;
use crate::protocol::message::Message;

/// Read one framed message. `max_payload` bounds the length prefix; a safe
/// ceiling is the piece size plus a small constant for the frame header.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Message, Error>
where
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 4];
    reader
        .read_exact(&mut length_buf)
        .await
        .map_err(|e| Error::session_with_source("failed to read frame length", e.to_string()))?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        trace!("received keep-alive");
        return Ok(Message::KeepAlive);
    }
    if length > max_payload {
        return Err(Error::session(format!(
            "frame length {} exceeds limit {}",
            length, max_payload
        )));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::session_with_source("failed to read frame payload", e.to_string()))?;

    Message::parse(&payload)
}

/// Serialize and write one message, flushing the stream
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.serialize();
    trace!(len = bytes.len(), id = ?message.message_id(), "writing frame");
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::session_with_source("failed to write frame", e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::session_with_source("failed to flush frame", e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Block;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_then_read() {
        let message = Message::Request(Block {
            piece_index: 9,
            begin: 0,
            length: 16384,
        });

        let mut buf = Vec::new();
        write_frame(&mut buf, &message).await.unwrap();

        let mut reader = Cursor::new(buf);
        let parsed = read_frame(&mut reader, 1 << 20).await.unwrap();
        assert_eq!(parsed, message);
    }

    #[tokio::test]
    async fn test_read_keepalive() {
        let mut reader = Cursor::new(vec![0u8, 0, 0, 0]);
        let parsed = read_frame(&mut reader, 16).await.unwrap();
        assert_eq!(parsed, Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_read_rejects_oversize_frame() {
        // length prefix claims 2 MiB against a 32 KiB limit
        let mut reader = Cursor::new(vec![0x00, 0x20, 0x00, 0x00]);
        let err = read_frame(&mut reader, 32 * 1024).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        // prefix says 10 bytes, only 3 follow
        let mut reader = Cursor::new(vec![0, 0, 0, 10, 7, 0, 0]);
        assert!(read_frame(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_read_several_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Interested).await.unwrap();
        write_frame(&mut buf, &Message::Unchoke).await.unwrap();
        write_frame(&mut buf, &Message::KeepAlive).await.unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(
            read_frame(&mut reader, 64).await.unwrap(),
            Message::Interested
        );
        assert_eq!(read_frame(&mut reader, 64).await.unwrap(), Message::Unchoke);
        assert_eq!(
            read_frame(&mut reader, 64).await.unwrap(),
            Message::KeepAlive
        );
    }
}
