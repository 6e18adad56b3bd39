//! Newline-framed line I/O over byte-stream transports.
//!
//! A wire line is a byte sequence terminated by `\n`; the terminator is
//! part of the framing but not of the semantic line. The semantic line —
//! the unit policy rules match on — is the wire line with trailing `\r`
//! and `\n` stripped (see [`trim_line`]). Lines are 8-bit clean; nothing
//! here assumes UTF-8.

use crate::error::{ProxyError, Result};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest wire line accepted before the session is torn down. The
/// control protocol has no hard limit, so this is a generous cap against
/// an endpoint streaming garbage without a terminator.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Buffered line reader over any byte-stream transport.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Read one wire line, terminator included.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream at a line boundary.
    /// End-of-stream in the middle of a line is a read failure, as is a
    /// line longer than [`MAX_LINE_LEN`].
    pub async fn read_line(&mut self) -> Result<Option<&[u8]>> {
        self.buf.clear();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProxyError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before line terminator",
                )));
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.buf.extend_from_slice(&available[..=pos]);
                    self.inner.consume(pos + 1);
                    if self.buf.len() > MAX_LINE_LEN {
                        return Err(ProxyError::LineTooLong { max: MAX_LINE_LEN });
                    }
                    return Ok(Some(&self.buf));
                }
                None => {
                    let taken = available.len();
                    self.buf.extend_from_slice(available);
                    self.inner.consume(taken);
                    if self.buf.len() > MAX_LINE_LEN {
                        return Err(ProxyError::LineTooLong { max: MAX_LINE_LEN });
                    }
                }
            }
        }
    }
}

/// Write one semantic line plus exactly one `\n`, flushed.
///
/// The line either goes out whole or the call fails; partial writes never
/// surface to the caller.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Strip the trailing `\r`/`\n` framing from a wire line, yielding the
/// semantic line. `\r\n` endings thus match rules written without `\r`.
#[must_use]
pub fn trim_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    &raw[..end]
}
