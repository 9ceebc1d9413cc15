//! Line framing for the device's serial stream.
//!
//! The device terminates every line with `\r\n`. Bytes are buffered raw and only decoded once a
//! full line is available, so the output does not depend on where the serial driver happened to
//! split the stream.

use bytes::{Buf, BytesMut};

pub const LINE_TERMINATOR: &[u8] = b"\r\n";

const INITIAL_BUFFER_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    // Bytes already searched for a terminator without finding one.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
        }
    }

    /// Append a chunk and iterate over every line it completes.
    ///
    /// Lines are trimmed of surrounding whitespace and lossily decoded. Anything after the last
    /// terminator stays buffered for the next call, including when the iterator is dropped early.
    pub fn feed<'a>(&'a mut self, data: &[u8]) -> Lines<'a> {
        self.buffer.extend_from_slice(data);
        Lines { framer: self }
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_line(&mut self) -> Option<String> {
        // Back up far enough to catch a terminator split across chunks.
        let start = self.scanned.saturating_sub(LINE_TERMINATOR.len() - 1);
        let found = self.buffer[start..]
            .windows(LINE_TERMINATOR.len())
            .position(|window| window == LINE_TERMINATOR);

        let end = match found {
            Some(position) => start + position,
            None => {
                self.scanned = self.buffer.len();
                return None;
            }
        };

        let line = self.buffer.split_to(end);
        self.buffer.advance(LINE_TERMINATOR.len());
        self.scanned = 0;

        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}
