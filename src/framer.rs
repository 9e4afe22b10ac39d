//! Newline-delimited JSON framing over a byte stream.
//!
//! One JSON-RPC message per line. Reads are buffered and split on `\n`, so a
//! message may arrive across several reads and one read may carry several
//! messages.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::FramerError;
use crate::protocol::{RpcId, RpcMessage, JSONRPC_VERSION};

/// Maximum bytes per JSON-RPC message (4 MiB).
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Reads whole messages from a buffered stream.
pub struct FrameReader<R> {
    reader: R,
    line: Vec<u8>,
    limit: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_MESSAGE_BYTES)
    }

    pub fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            reader,
            line: Vec::new(),
            limit,
        }
    }

    /// Next message from the stream, or `None` at end of stream.
    ///
    /// A line that fails to decode is consumed and reported as
    /// [`FramerError::Protocol`], or [`FramerError::MalformedReply`] when it
    /// still carries the id of the request it answers. The next call continues
    /// with the following line.
    pub async fn read(&mut self) -> Result<Option<RpcMessage>, FramerError> {
        loop {
            self.line.clear();
            let n = (&mut self.reader)
                .take(self.limit as u64 + 1)
                .read_until(b'\n', &mut self.line)
                .await?;
            if n == 0 {
                return Ok(None);
            }

            if n > self.limit && self.line.last() != Some(&b'\n') {
                self.discard_rest_of_line().await?;
                return Err(FramerError::Protocol(format!(
                    "message exceeds {} bytes",
                    self.limit
                )));
            }

            let trimmed = match std::str::from_utf8(&self.line) {
                Ok(s) => s.trim(),
                Err(_) => {
                    return Err(FramerError::Protocol("line is not valid UTF-8".into()));
                }
            };

            if trimmed.is_empty() {
                continue;
            }

            trace!(line = trimmed, "frame in");
            let message: RpcMessage = serde_json::from_str(trimmed).map_err(|e| {
                rejected(trimmed, format!("malformed JSON-RPC message: {e}"))
            })?;

            if message.jsonrpc != JSONRPC_VERSION {
                return Err(rejected(
                    trimmed,
                    format!("unsupported jsonrpc version `{}`", message.jsonrpc),
                ));
            }

            return Ok(Some(message));
        }
    }

    async fn discard_rest_of_line(&mut self) -> std::io::Result<()> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    self.reader.consume(i + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Error for an undecodable line, keeping the request id when the line looks
/// like a reply (has an `id`, no `method`).
fn rejected(line: &str, reason: String) -> FramerError {
    let id = serde_json::from_str::<Value>(line)
        .ok()
        .filter(|value| value.get("method").is_none())
        .and_then(|mut value| value.get_mut("id").map(Value::take))
        .and_then(|id| serde_json::from_value::<RpcId>(id).ok());
    match id {
        Some(id) => FramerError::MalformedReply { id, reason },
        None => FramerError::Protocol(reason),
    }
}

/// Writes messages as compact JSON lines.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize, append `\n`, write and flush.
    pub async fn write(&mut self, message: &RpcMessage) -> Result<(), FramerError> {
        let mut out = serde_json::to_vec(message)
            .map_err(|e| FramerError::Protocol(format!("cannot encode message: {e}")))?;
        out.push(b'\n');
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), FramerError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
