//! Newline-delimited line accumulation
//!
//! Edge sessions speak one JSON object per line, but reads arrive in
//! arbitrary fragments. Each session keeps a bounded accumulator: complete
//! lines are handed out, a trailing partial line waits for the next read,
//! and an oversize line (no newline within the buffer) resets the
//! accumulator and resyncs at the next newline. The garbage tail of a
//! reset line surfaces as a non-JSON "line" that the dispatcher ignores.

use bytes::BytesMut;

/// Default accumulator size; a line that doesn't fit is a protocol violation
pub const MAX_LINE: usize = 8192;

#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        assert!(max_line > 0, "line limit must be nonzero");
        Self {
            buf: BytesMut::with_capacity(max_line),
            max_line,
        }
    }

    /// Bytes currently held back as a partial line
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed received bytes and collect every complete line. Lines are
    /// trimmed of surrounding whitespace (including `\r`); empty and
    /// non-UTF-8 lines are silently skipped.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let free = self.max_line - self.buf.len();
            if free == 0 {
                tracing::debug!(limit = self.max_line, "Oversize line, resetting accumulator");
                self.buf.clear();
                continue;
            }
            let take = free.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw = self.buf.split_to(pos + 1);
                if let Ok(line) = std::str::from_utf8(&raw[..pos]) {
                    let line = line.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                }
            }
        }

        lines
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
