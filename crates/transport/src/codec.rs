//! Content-Length framed JSON messages over async byte streams.
//!
//! Frame layout: `Content-Length: <n>\r\n\r\n<n bytes of JSON>`. Unknown
//! headers are tolerated and skipped. Oversized frames are rejected so a
//! misbehaving tool process cannot exhaust memory.

use parley_core::error::TransportError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body.
const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Write one framed JSON message.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &serde_json::Value,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| TransportError::Malformed(format!("encode: {e}")))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .map_err(|e| TransportError::ChannelClosed(format!("write header: {e}")))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| TransportError::ChannelClosed(format!("write body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::ChannelClosed(format!("flush: {e}")))?;
    Ok(())
}

/// Read one framed JSON message. `Ok(None)` means clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Option<serde_json::Value>, TransportError> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TransportError::ChannelClosed(format!("read header: {e}")))?;
        if bytes_read == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(TransportError::ChannelClosed(
                    "stream ended mid-frame".into(),
                ))
            };
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(len_str) = trimmed
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(str::to_string)
        {
            let len: usize = len_str
                .trim()
                .parse()
                .map_err(|e| TransportError::Malformed(format!("bad content-length: {e}")))?;
            content_length = Some(len);
        }
    }

    let len = content_length
        .ok_or_else(|| TransportError::Malformed("missing Content-Length".into()))?;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Malformed(format!(
            "frame too large ({len} bytes)"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TransportError::ChannelClosed(format!("read body: {e}")))?;

    let value = serde_json::from_slice(&body)
        .map_err(|e| TransportError::Malformed(format!("invalid json: {e}")))?;
    Ok(Some(value))
}
