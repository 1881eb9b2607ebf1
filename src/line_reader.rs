use std::io::{BufRead, ErrorKind};

use crate::error::FilterError;

/// Reads newline-terminated lines from a buffered stream, refusing to grow
/// a single line beyond `max_line_bytes`.
///
/// Lines are returned with their terminator. Lines longer than the
/// underlying buffer are assembled across several `fill_buf` calls; only
/// the explicit ceiling bounds them. The returned slice borrows an internal
/// buffer that is reused for the next call, so peak memory tracks the
/// longest line rather than the stream.
pub struct BoundedLineReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<R: BufRead> BoundedLineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        BoundedLineReader {
            inner,
            max_line_bytes,
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    /// Next line including its `\n`, or `None` at end of input.
    ///
    /// A trailing remainder without a terminator is returned as the final
    /// line. Exceeding the ceiling fails with `LineTooLong` and yields no
    /// partial line.
    pub fn read_line(&mut self) -> Result<Option<&[u8]>, FilterError> {
        self.buf.clear();

        loop {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FilterError::Read(e)),
            };

            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                self.lines_read += 1;
                return Ok(Some(&self.buf));
            }

            let (take, terminated) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };

            if self.buf.len() + take > self.max_line_bytes {
                return Err(FilterError::LineTooLong {
                    line: self.lines_read + 1,
                    max_line_bytes: self.max_line_bytes,
                });
            }

            self.buf.extend_from_slice(&available[..take]);
            self.inner.consume(take);

            if terminated {
                self.lines_read += 1;
                return Ok(Some(&self.buf));
            }
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
