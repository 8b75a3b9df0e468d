//! Line reassembly over arbitrarily split transport chunks.
//!
//! The transport delivers byte fragments with no alignment guarantees: a
//! single protocol line may arrive across several reads, one read may
//! carry many lines, and a chunk boundary may fall inside a multi-byte
//! UTF-8 character. `LineBuffer` therefore carries raw bytes between
//! calls and only decodes whole lines. A `\n` byte never occurs inside a
//! multi-byte UTF-8 sequence, so splitting on it cannot cut a character.

use bytes::BytesMut;

/// Carry buffer turning a chunk sequence into a line sequence.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and return every newly completed line, in order.
    ///
    /// Lines are terminated by `b'\n'`; the terminator is stripped but the
    /// line body is otherwise untouched. The trailing unterminated segment
    /// stays buffered, undecoded, until a later chunk completes it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.carry.iter().position(|&b| b == b'\n') {
            let line = self.carry.split_to(idx + 1);
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Consume the buffer at end of stream.
    ///
    /// A stream must end on a line boundary for its last frame to count; a
    /// dangling partial line is returned here only so the caller can log it
    /// before discarding.
    pub fn finish(self) -> Option<String> {
        if self.carry.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.carry).into_owned())
        }
    }
}
