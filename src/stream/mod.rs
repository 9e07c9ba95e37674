//! Wire stream handling: line framing, the per-request decoder, and the
//! sub-extractors it drives (tool-call assembler, reasoning extractor,
//! usage tracker).

pub mod assembler;
pub mod decoder;
pub mod reasoning;
pub mod usage;

use memchr::memchr_iter;

/// Prefix of a data record line. Lines without it are ignored.
pub const DATA_PREFIX: &str = "data:";
/// Literal payload signalling logical end-of-stream.
pub const STREAM_SENTINEL: &str = "[DONE]";

/// One framed wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireRecord {
    /// The trimmed payload of a `data:` line.
    Data(String),
    /// The end-of-stream sentinel.
    Sentinel,
}

/// Incremental newline framer.
///
/// Feed it text chunks arriving at arbitrary boundaries; it yields one
/// [`WireRecord`] per complete `data:` line, withholding a trailing partial
/// line until the next chunk completes it. Non-data lines (blank separators,
/// `event:` lines, comments) produce nothing.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
    read_offset: usize,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and append any complete records to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<WireRecord>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            if let Some(record) = parse_line(line) {
                out.push(record);
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Drain the withheld final partial line at end-of-input, in case the
    /// last record arrived without a trailing newline.
    pub fn finish_into(&mut self, out: &mut Vec<WireRecord>) {
        if self.read_offset < self.buffer.len() {
            if let Some(record) = parse_line(&self.buffer[self.read_offset..]) {
                out.push(record);
            }
        }
        self.buffer.clear();
        self.read_offset = 0;
    }
}

fn parse_line(line: &str) -> Option<WireRecord> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix(DATA_PREFIX)?.trim();
    if payload == STREAM_SENTINEL {
        return Some(WireRecord::Sentinel);
    }
    if payload.is_empty() {
        return None;
    }
    Some(WireRecord::Data(payload.to_owned()))
}
