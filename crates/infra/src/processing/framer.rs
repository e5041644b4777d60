//! Incremental line framing over byte chunks.

use bytes::{Buf, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// Splits a chunked byte stream into logical lines.
///
/// Terminators are `\n`, `\r\n` and a lone `\r`. A terminator split across two
/// chunks is still a single terminator, and a multi-byte character split across
/// chunks is reassembled before decoding.
///
/// Feed chunks with [`push`](Self::push) and pull lines with
/// [`next_line`](Self::next_line) until it yields `None`. Lines ahead of an
/// over-long one are always handed out before the error. The buffer holds at
/// most the current chunk plus one partial line of up to `max_line_bytes`.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_bytes: usize,
    /// Prefix of `buf` already known to hold no terminator.
    scanned: usize,
    /// Last line ended on a `\r` at the end of the buffer; a leading `\n` belongs to it.
    skip_lf: bool,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line_bytes,
            scanned: 0,
            skip_lf: false,
        }
    }

    /// Buffer one chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, or `None` until more input arrives.
    pub fn next_line(&mut self) -> Result<Option<String>, FramingError> {
        if self.skip_lf && !self.buf.is_empty() {
            if self.buf[0] == b'\n' {
                self.buf.advance(1);
            }
            self.skip_lf = false;
        }

        let found = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .map(|offset| self.scanned + offset);

        let Some(pos) = found else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_line_bytes {
                return Err(self.too_long());
            }
            return Ok(None);
        };
        if pos > self.max_line_bytes {
            return Err(self.too_long());
        }

        let line = self.buf.split_to(pos);
        let carriage_return = self.buf[0] == b'\r';
        self.buf.advance(1);
        self.scanned = 0;

        if carriage_return {
            match self.buf.first() {
                Some(b'\n') => self.buf.advance(1),
                Some(_) => {}
                None => self.skip_lf = true,
            }
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// End of input: the unterminated tail, if any, is the last line.
    ///
    /// Call once `next_line` has returned `None`.
    pub fn finish(&mut self) -> Result<Option<String>, FramingError> {
        self.skip_lf = false;
        self.scanned = 0;
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() > self.max_line_bytes {
            return Err(self.too_long());
        }
        let line = self.buf.split();
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn too_long(&self) -> FramingError {
        FramingError::LineTooLong {
            limit: self.max_line_bytes,
        }
    }
}
