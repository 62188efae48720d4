//! Line reader with pushback and data-block decoding.
//!
//! The stream is octet-oriented with `\n` terminators. Header lines must
//! be valid UTF-8; counted `data` payloads are raw bytes and are streamed
//! straight into a sink, never held whole in memory.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the lexer layer.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error reading stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: stream is not valid UTF-8")]
    InvalidUtf8 { line: u64 },

    #[error("line {line}: malformed data header '{header}'")]
    BadDataHeader { line: u64, header: String },

    #[error("end of stream inside {len}-byte data block at line {line}")]
    TruncatedData { line: u64, len: u64 },

    #[error("end of stream before delimiter '{delim}' for data block at line {line}")]
    MissingDelimiter { line: u64, delim: String },

    #[error("end of stream where a data block was required")]
    DataAtEof,
}

pub type Result<T> = std::result::Result<T, StreamError>;

// =============================================================================
// StreamReader
// =============================================================================

/// Buffered line reader over the import stream.
///
/// Supports one line of pushback so the parser can peek, and tracks line
/// numbers for diagnostics. Counted payload bytes pass through without
/// touching the line counter.
pub struct StreamReader<R> {
    input: R,
    pushback: Option<String>,
    line: u64,
}

impl<R: AsyncBufRead + Unpin> StreamReader<R> {
    pub fn new(input: R) -> StreamReader<R> {
        StreamReader {
            input,
            pushback: None,
            line: 0,
        }
    }

    /// The line number of the most recently returned line.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Read the next line, without its terminator. `None` at end of
    /// stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pushback.take() {
            self.line += 1;
            return Ok(Some(line));
        }
        let mut buf = Vec::new();
        let n = self.input.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        self.line += 1;
        match String::from_utf8(buf) {
            Ok(s) => Ok(Some(s)),
            Err(_) => Err(StreamError::InvalidUtf8 { line: self.line }),
        }
    }

    /// Push one line back; the next `read_line` returns it again.
    pub fn unread(&mut self, line: String) {
        debug_assert!(self.pushback.is_none(), "single-line pushback only");
        self.line = self.line.saturating_sub(1);
        self.pushback = Some(line);
    }

    /// Read a `data` block, streaming the payload into `sink`. Returns the
    /// payload length in bytes.
    ///
    /// Two encodings are recognized: counted (`data <N>`) and delimited
    /// (`data <<DELIM`). A single trailing newline after a counted payload
    /// is consumed if present; anything else is pushed back.
    pub async fn read_data<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<u64> {
        let header = self.read_line().await?.ok_or(StreamError::DataAtEof)?;
        let start = self.line;
        let rest = match header.strip_prefix("data ") {
            Some(rest) => rest,
            None => {
                return Err(StreamError::BadDataHeader {
                    line: start,
                    header,
                })
            }
        };

        if let Some(delim) = rest.strip_prefix("<<") {
            let delim = delim.to_string();
            let mut written = 0u64;
            loop {
                match self.read_line().await? {
                    None => {
                        return Err(StreamError::MissingDelimiter {
                            line: start,
                            delim,
                        })
                    }
                    Some(line) if line == delim => break,
                    Some(line) => {
                        sink.write_all(line.as_bytes()).await?;
                        sink.write_all(b"\n").await?;
                        written += line.len() as u64 + 1;
                    }
                }
            }
            sink.flush().await?;
            return Ok(written);
        }

        let len: u64 = match rest.trim().parse() {
            Ok(len) => len,
            Err(_) => {
                return Err(StreamError::BadDataHeader {
                    line: start,
                    header,
                })
            }
        };
        let mut remaining = len;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.input.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(StreamError::TruncatedData { line: start, len });
            }
            sink.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        sink.flush().await?;

        // Some producers terminate the payload with a newline, some don't.
        match self.read_line().await? {
            Some(line) if line.is_empty() => {}
            Some(line) => self.unread(line),
            None => {}
        }
        Ok(len)
    }

    /// Read a `data` block into a string, replacing invalid UTF-8.
    pub async fn read_data_string(&mut self) -> Result<String> {
        let mut sink = std::io::Cursor::new(Vec::new());
        self.read_data(&mut sink).await?;
        Ok(String::from_utf8_lossy(&sink.into_inner()).into_owned())
    }
}
