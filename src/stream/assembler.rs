use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::error::Error;
use crate::protocol::event::{StopReason, StreamEvent};
use crate::protocol::ToolCallFragment;
use crate::util::next_call_id;

/// One not-yet-completed tool call, keyed by the vendor's stream-local slot
/// index.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments_buf: String,
}

/// Accumulates fragmented tool-call payloads and emits each logical call
/// exactly once, with syntactically valid parsed arguments.
///
/// Scoped to one stream; owned exclusively by its decoder, so no locking.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    // BTreeMap keeps forced-flush order deterministic (ascending index).
    pending: BTreeMap<u32, PendingToolCall>,
    completed_indexes: FxHashSet<u32>,
    seen_index_keys: FxHashSet<(String, u32)>,
    seen_content_keys: FxHashSet<(String, String)>,
}

impl ToolCallAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment into the pending call at its index, then attempt
    /// emission. Later non-empty id/name fragments overwrite; argument
    /// fragments concatenate. Fragments referencing an already-completed
    /// index are silently discarded (duplicate-delivery defense).
    pub fn accumulate(&mut self, fragment: ToolCallFragment, out: &mut Vec<StreamEvent>) {
        let index = fragment.index;
        if self.completed_indexes.contains(&index) {
            tracing::debug!(index, "discarding fragment for an already-completed tool call");
            return;
        }

        let pending = self.pending.entry(index).or_default();
        if let Some(id) = fragment.id {
            if !id.is_empty() {
                pending.id = Some(id);
            }
        }
        if let Some(name) = fragment.name {
            if !name.is_empty() {
                pending.name = Some(name);
            }
        }
        if let Some(arguments) = fragment.arguments {
            pending.arguments_buf.push_str(&arguments);
        }

        self.try_emit(index, out);
    }

    /// Whether any calls are still pending (used by tests and diagnostics).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn try_emit(&mut self, index: u32, out: &mut Vec<StreamEvent>) {
        let Some(pending) = self.pending.get(&index) else {
            return;
        };
        let Some(name) = pending.name.clone() else {
            return;
        };
        // Partial argument JSON is the expected, common case mid-stream:
        // swallow the failure and keep waiting.
        let Ok(arguments) = serde_json::from_str::<serde_json::Value>(&pending.arguments_buf)
        else {
            return;
        };
        self.finish(index, name, arguments, out);
    }

    /// Flush every still-pending index at stream end. A parse failure is
    /// fatal only when the vendor explicitly declared a tool-calls finish;
    /// on a generic end the index is abandoned with a log.
    pub fn flush(
        &mut self,
        finish: Option<StopReason>,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), Error> {
        let indexes: Vec<u32> = self.pending.keys().copied().collect();
        for index in indexes {
            let Some(pending) = self.pending.get(&index) else {
                continue;
            };
            let name = pending.name.clone().unwrap_or_default();
            // A call that never got arguments is a zero-argument call, not a
            // parse failure. Some vendors send no argument fragments at all
            // for nullary tools, so an empty buffer reads as `{}` here and
            // only a non-empty buffer that fails to parse is incomplete.
            let buf = if pending.arguments_buf.is_empty() {
                "{}"
            } else {
                pending.arguments_buf.as_str()
            };
            match serde_json::from_str::<serde_json::Value>(buf) {
                Ok(arguments) if !name.is_empty() => {
                    self.finish(index, name, arguments, out);
                }
                result => {
                    let detail = match result {
                        Err(err) => err.to_string(),
                        Ok(_) => "missing function name".to_owned(),
                    };
                    if finish == Some(StopReason::ToolCalls) {
                        return Err(Error::IncompleteToolCall { name, detail });
                    }
                    tracing::warn!(index, %detail, "abandoning incomplete tool call at stream end");
                    self.pending.remove(&index);
                }
            }
        }
        Ok(())
    }

    fn finish(
        &mut self,
        index: u32,
        name: String,
        arguments: serde_json::Value,
        out: &mut Vec<StreamEvent>,
    ) {
        let pending = self.pending.remove(&index);
        self.completed_indexes.insert(index);

        // serde_json objects are key-sorted, so this string is canonical.
        let content_key = (name.clone(), arguments.to_string());
        let index_key = (name.clone(), index);
        if self.seen_index_keys.contains(&index_key)
            || self.seen_content_keys.contains(&content_key)
        {
            tracing::debug!(index, name = %index_key.0, "suppressing duplicate tool call");
            return;
        }
        self.seen_index_keys.insert(index_key);
        self.seen_content_keys.insert(content_key);

        let id = pending
            .and_then(|p| p.id)
            .unwrap_or_else(next_call_id);
        out.push(StreamEvent::ToolCall {
            id,
            name,
            arguments,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(str::to_owned),
            name: name.map(str::to_owned),
            arguments: arguments.map(str::to_owned),
        }
    }

    #[test]
    fn test_emits_once_when_arguments_complete() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(
            fragment(0, Some("call_1"), Some("get_weather"), Some("{\"loc\":")),
            &mut out,
        );
        assert!(out.is_empty());
        assembler.accumulate(fragment(0, None, None, Some("\"SF\"}")), &mut out);
        assert_eq!(
            out,
            vec![StreamEvent::ToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments: json!({"loc": "SF"}),
            }]
        );
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_completed_index_never_reprocessed() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(
            fragment(0, Some("call_1"), Some("get_weather"), Some("{}")),
            &mut out,
        );
        assert_eq!(out.len(), 1);
        // Duplicate delivery of the whole call.
        assembler.accumulate(
            fragment(0, Some("call_1"), Some("get_weather"), Some("{}")),
            &mut out,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_same_content_different_index_suppressed() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(
            fragment(0, Some("a"), Some("lookup"), Some("{\"q\":1}")),
            &mut out,
        );
        assembler.accumulate(
            fragment(1, Some("b"), Some("lookup"), Some("{\"q\":1}")),
            &mut out,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_later_name_fragment_overwrites() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(fragment(2, None, Some("draft"), None), &mut out);
        assembler.accumulate(fragment(2, Some("call_2"), Some("final"), Some("{}")), &mut out);
        assert!(matches!(
            &out[0],
            StreamEvent::ToolCall { name, .. } if name == "final"
        ));
    }

    #[test]
    fn test_flush_tool_calls_finish_with_bad_buffer_is_fatal() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(fragment(0, None, Some("lookup"), Some("{\"q\":")), &mut out);
        let result = assembler.flush(Some(StopReason::ToolCalls), &mut out);
        assert!(matches!(result, Err(Error::IncompleteToolCall { .. })));
    }

    #[test]
    fn test_flush_generic_end_with_bad_buffer_is_dropped() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(fragment(0, None, Some("lookup"), Some("{\"q\":")), &mut out);
        assembler.flush(None, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_flush_empty_buffer_is_zero_argument_call() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(fragment(0, Some("call_z"), Some("ping"), None), &mut out);
        assert!(out.is_empty());
        assembler
            .flush(Some(StopReason::ToolCalls), &mut out)
            .unwrap();
        assert_eq!(
            out,
            vec![StreamEvent::ToolCall {
                id: "call_z".into(),
                name: "ping".into(),
                arguments: json!({}),
            }]
        );
    }

    #[test]
    fn test_generated_id_when_vendor_never_supplied_one() {
        let mut assembler = ToolCallAssembler::new();
        let mut out = Vec::new();
        assembler.accumulate(fragment(0, None, Some("lookup"), Some("{}")), &mut out);
        let StreamEvent::ToolCall { id, .. } = &out[0] else {
            panic!("expected tool call");
        };
        assert!(id.starts_with("call_"));
    }

    #[test]
    fn test_all_fragment_splits_reassemble() {
        let payload = r#"{"query":"rust streams","limit":5}"#;
        for split in 1..payload.len() {
            let mut assembler = ToolCallAssembler::new();
            let mut out = Vec::new();
            assembler.accumulate(
                fragment(0, Some("call_s"), Some("search"), Some(&payload[..split])),
                &mut out,
            );
            assembler.accumulate(fragment(0, None, None, Some(&payload[split..])), &mut out);
            assert_eq!(out.len(), 1, "split at {split}");
            let StreamEvent::ToolCall { arguments, .. } = &out[0] else {
                panic!("expected tool call");
            };
            assert_eq!(arguments, &json!({"query": "rust streams", "limit": 5}));
        }
    }
}
