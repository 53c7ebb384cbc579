//! Bounded capture of child process output.

use std::io::Write;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Marker appended to output that hit the capture limit.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const READ_CHUNK: usize = 8 * 1024;

/// An append-only buffer that keeps at most `limit` bytes.
///
/// Bytes beyond the limit are counted and discarded, so a reader can keep
/// draining a pipe without growing memory.
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    buffer: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl CapturedOutput {
    /// Create a new captured output buffer with a byte limit.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    /// Append bytes, keeping only what fits under the limit.
    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.buffer.len());
        let take = room.min(bytes.len());
        self.buffer.extend_from_slice(&bytes[..take]);
        self.dropped += bytes.len() - take;
    }

    /// Whether any bytes were discarded.
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Number of bytes discarded past the limit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the captured output as a string.
    ///
    /// A multi-byte character cut by the limit is dropped rather than
    /// replaced, and the truncation marker is appended when bytes were lost.
    pub fn into_string(self) -> String {
        let truncated = self.is_truncated();
        let mut text = match String::from_utf8(self.buffer) {
            Ok(text) => text,
            Err(err) => {
                let utf8 = err.utf8_error();
                let mut bytes = err.into_bytes();
                if truncated && utf8.error_len().is_none() {
                    bytes.truncate(utf8.valid_up_to());
                }
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }

    /// Read `reader` to end, capturing at most `limit` bytes.
    pub async fn drain<R>(mut reader: R, limit: usize) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut captured = Self::new(limit);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            captured.push(&chunk[..n]);
        }
        Ok(captured)
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
