//! JSON-RPC framing codec for the analyzer's stdio.
//!
//! Frames are `Content-Length: N\r\n\r\n{json}`. This module provides
//! [`FrameReader`] and [`FrameWriter`] for async reading and writing of framed
//! JSON-RPC messages. Any [`FrameError`] from the reader means the stream is no
//! longer synchronised and must be abandoned.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (32 MiB). Reference lists on large module graphs are big,
/// but anything past this is a desynchronised stream, not a real message.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error on analyzer stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected EOF while reading headers")]
    EofInHeaders,
    #[error("frame body truncated: expected {expected} bytes")]
    TruncatedBody { expected: usize },
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },
    #[error("frame body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("serializing frame: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then deserializes the body as JSON.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized {
                len: content_length,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::TruncatedBody {
                    expected: content_length,
                },
                _ => FrameError::Io(e),
            })?;

        let value = serde_json::from_slice(&body).map_err(FrameError::InvalidJson)?;
        Ok(Some(value))
    }

    /// Parse `\r\n`-terminated header lines until the empty separator line.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // `content_length == None` doesn't imply "no headers read":
                // EOF after only Content-Type is still a torn frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FrameError::EofInHeaders);
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                let len = value
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
            // Other headers (Content-Type) are tolerated and ignored.
        }

        content_length
            .map(Some)
            .ok_or(FrameError::MissingContentLength)
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Not safe for concurrent use; the engine funnels every write through one
/// writer task.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_string(msg).map_err(FrameError::Serialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flush and shut the underlying stream down, signalling EOF to the peer.
    pub async fn close(mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
