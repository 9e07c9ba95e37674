use std::sync::LazyLock;
use std::time::Duration;

use memchr::memmem;
use tokio::time::Instant;

use crate::protocol::event::StreamEvent;
use crate::protocol::ReasoningFragment;
use crate::util::next_thinking_id;

/// Delay before a quiet reasoning buffer is flushed as one coalesced event.
pub const FLUSH_DELAY: Duration = Duration::from_millis(80);

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
static THINK_OPEN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(THINK_OPEN.as_bytes()));
static THINK_CLOSE_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(THINK_CLOSE.as_bytes()));

/// Extracts model reasoning ("thinking") content from a stream and coalesces
/// it into time-windowed canonical events.
///
/// Three encodings feed one buffer: structured detail arrays and simple
/// reasoning fields (already reduced to [`ReasoningFragment`]s by the dialect
/// decoders), and an inline `<think>…</think>` markup convention embedded in
/// ordinary text. Inline state persists across chunks because the tags may
/// arrive split over several records.
#[derive(Debug)]
pub struct ReasoningExtractor {
    buffer: String,
    id: Option<String>,
    deadline: Option<Instant>,
    flush_delay: Duration,
    /// Currently inside an inline `<think>` block.
    inside_inline: bool,
    /// Inline detection is settled off: a full chunk scanned clean while
    /// outside a block, so ordinary providers are not re-scanned forever.
    inline_settled: bool,
    /// Trailing text withheld because it could be the start of a split tag.
    carry: String,
}

impl Default for ReasoningExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_flush_delay(FLUSH_DELAY)
    }

    #[must_use]
    pub fn with_flush_delay(flush_delay: Duration) -> Self {
        Self {
            buffer: String::new(),
            id: None,
            deadline: None,
            flush_delay,
            inside_inline: false,
            inline_settled: false,
            carry: String::new(),
        }
    }

    /// The pending flush deadline, when armed. The decoder's select loop
    /// waits on this; there is never more than one pending deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Append structured reasoning fragments (detail-array or simple-field
    /// encodings, already ordered by the dialect decoder).
    pub fn append_fragments(&mut self, fragments: &[ReasoningFragment]) {
        for fragment in fragments {
            if !fragment.text.is_empty() {
                self.append(&fragment.text);
            }
        }
    }

    /// Route one visible-text delta through inline-markup detection. Reasoning
    /// spans feed the buffer; visible spans are emitted as `TextDelta`, each
    /// one first forcing a flush of any active reasoning block.
    pub fn scan_text(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if self.inline_settled {
            self.emit_visible(text, out);
            return;
        }

        let mut input = if self.carry.is_empty() {
            text.to_owned()
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.push_str(text);
            joined
        };
        let mut saw_tag = false;

        loop {
            if self.inside_inline {
                match THINK_CLOSE_FINDER.find(input.as_bytes()) {
                    Some(pos) => {
                        let after = pos + THINK_CLOSE.len();
                        self.append(&input[..pos]);
                        self.inside_inline = false;
                        saw_tag = true;
                        input.drain(..after);
                    }
                    None => {
                        let keep = partial_tag_suffix(&input, THINK_CLOSE);
                        let split = input.len() - keep;
                        self.append(&input[..split]);
                        self.carry = input.split_off(split);
                        break;
                    }
                }
            } else {
                match THINK_OPEN_FINDER.find(input.as_bytes()) {
                    Some(pos) => {
                        let after = pos + THINK_OPEN.len();
                        self.emit_visible(&input[..pos], out);
                        self.inside_inline = true;
                        saw_tag = true;
                        input.drain(..after);
                    }
                    None => {
                        let keep = partial_tag_suffix(&input, THINK_OPEN);
                        let split = input.len() - keep;
                        self.emit_visible(&input[..split], out);
                        self.carry = input.split_off(split);
                        break;
                    }
                }
            }
        }

        // Settle only after a clean scan: no tag seen, outside any block, and
        // nothing withheld as a possible split tag.
        if !saw_tag && !self.inside_inline && self.carry.is_empty() {
            self.inline_settled = true;
        }
    }

    /// Flush fired by the deadline: emit the coalesced buffer under the
    /// current id, which stays live for subsequent reasoning content.
    pub fn flush_timer(&mut self, out: &mut Vec<StreamEvent>) {
        self.deadline = None;
        self.flush_buffer(out);
    }

    /// Final flush at stream end: emit whatever remains, release any withheld
    /// partial-tag text as visible, clear the id, disarm the timer.
    pub fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            if self.inside_inline {
                self.buffer.push_str(&carry);
            } else {
                self.emit_visible(&carry, out);
            }
        }
        self.deadline = None;
        self.flush_buffer(out);
        self.id = None;
    }

    /// Discard all buffered state without emitting (cancellation path).
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.carry.clear();
        self.id = None;
        self.deadline = None;
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.id.is_none() {
            self.id = Some(next_thinking_id());
        }
        self.buffer.push_str(text);
        // Any pending flush is superseded by a fresh deadline.
        self.deadline = Some(Instant::now() + self.flush_delay);
    }

    fn emit_visible(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        if self.id.is_some() {
            // Visible content interrupts reasoning: flush under the current
            // id, then force a fresh id for the next reasoning fragment.
            self.deadline = None;
            self.flush_buffer(out);
            self.id = None;
        }
        out.push(StreamEvent::TextDelta {
            text: text.to_owned(),
        });
    }

    fn flush_buffer(&mut self, out: &mut Vec<StreamEvent>) {
        if self.buffer.is_empty() {
            return;
        }
        let id = self
            .id
            .get_or_insert_with(next_thinking_id)
            .clone();
        out.push(StreamEvent::ThinkingDelta {
            id,
            text: std::mem::take(&mut self.buffer),
        });
    }
}

/// Length of the longest strict suffix of `input` that is a prefix of `tag`.
fn partial_tag_suffix(input: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(input.len());
    for len in (1..=max).rev() {
        if input.ends_with(&tag[..len]) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts_of(out: &[StreamEvent]) -> Vec<(&'static str, String)> {
        out.iter()
            .map(|event| match event {
                StreamEvent::TextDelta { text } => ("text", text.clone()),
                StreamEvent::ThinkingDelta { text, .. } => ("thinking", text.clone()),
                _ => ("other", String::new()),
            })
            .collect()
    }

    #[test]
    fn test_partial_tag_suffix() {
        assert_eq!(partial_tag_suffix("abc<thi", THINK_OPEN), 4);
        assert_eq!(partial_tag_suffix("abc<", THINK_OPEN), 1);
        assert_eq!(partial_tag_suffix("abc", THINK_OPEN), 0);
        assert_eq!(partial_tag_suffix("</thin", THINK_CLOSE), 6);
    }

    #[test]
    fn test_inline_tag_split_across_chunks() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("<thi", &mut out);
        extractor.scan_text("nk>hello</think>", &mut out);
        extractor.finish(&mut out);
        assert_eq!(texts_of(&out), vec![("thinking", "hello".to_owned())]);
    }

    #[test]
    fn test_visible_text_around_inline_block() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("before<think>deep</think>after", &mut out);
        extractor.finish(&mut out);
        // Trailing visible text forces the buffered block out first.
        assert_eq!(
            texts_of(&out),
            vec![
                ("text", "before".to_owned()),
                ("thinking", "deep".to_owned()),
                ("text", "after".to_owned()),
            ]
        );
    }

    #[test]
    fn test_plain_chunk_settles_detection() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("just text", &mut out);
        assert!(extractor.inline_settled);
        // A later literal tag passes through as visible text.
        extractor.scan_text("<think>not reasoning", &mut out);
        extractor.finish(&mut out);
        assert_eq!(
            texts_of(&out),
            vec![
                ("text", "just text".to_owned()),
                ("text", "<think>not reasoning".to_owned()),
            ]
        );
    }

    #[test]
    fn test_partial_prefix_does_not_settle() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("<thi", &mut out);
        assert!(!extractor.inline_settled);
        // False alarm: not actually a tag.
        extractor.scan_text("ng else", &mut out);
        assert!(extractor.inline_settled);
        assert_eq!(texts_of(&out), vec![("text", "<thing else".to_owned())]);
    }

    #[test]
    fn test_visible_text_interrupt_flushes_and_rotates_id() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.append_fragments(&[ReasoningFragment {
            index: None,
            text: "first block".into(),
        }]);
        extractor.scan_text("visible", &mut out);
        extractor.append_fragments(&[ReasoningFragment {
            index: None,
            text: "second block".into(),
        }]);
        extractor.finish(&mut out);

        let ids: Vec<&str> = out
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ThinkingDelta { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(
            texts_of(&out),
            vec![
                ("thinking", "first block".to_owned()),
                ("text", "visible".to_owned()),
                ("thinking", "second block".to_owned()),
            ]
        );
    }

    #[test]
    fn test_timer_flush_keeps_id() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.append_fragments(&[ReasoningFragment {
            index: None,
            text: "part one ".into(),
        }]);
        extractor.flush_timer(&mut out);
        extractor.append_fragments(&[ReasoningFragment {
            index: None,
            text: "part two".into(),
        }]);
        extractor.finish(&mut out);

        let ids: Vec<&str> = out
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ThinkingDelta { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![ids[0], ids[0]]);
    }

    #[test]
    fn test_append_arms_deadline_and_finish_disarms() {
        let mut extractor = ReasoningExtractor::new();
        assert!(extractor.deadline().is_none());
        extractor.append_fragments(&[ReasoningFragment {
            index: None,
            text: "x".into(),
        }]);
        assert!(extractor.deadline().is_some());
        let mut out = Vec::new();
        extractor.finish(&mut out);
        assert!(extractor.deadline().is_none());
    }

    #[test]
    fn test_discard_emits_nothing() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("<think>secret", &mut out);
        extractor.discard();
        assert!(out.is_empty());
        extractor.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unterminated_block_flushed_at_end() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("<think>never closed", &mut out);
        extractor.finish(&mut out);
        assert_eq!(texts_of(&out), vec![("thinking", "never closed".to_owned())]);
    }

    #[test]
    fn test_trailing_partial_tag_released_as_visible_at_end() {
        let mut extractor = ReasoningExtractor::new();
        let mut out = Vec::new();
        extractor.scan_text("tail<thi", &mut out);
        extractor.finish(&mut out);
        assert_eq!(
            texts_of(&out),
            vec![
                ("text", "tail".to_owned()),
                ("text", "<thi".to_owned()),
            ]
        );
    }
}
