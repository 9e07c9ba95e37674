pub mod anthropic;
pub mod event;
pub mod mapping;
pub mod openai;

use smallvec::SmallVec;

use self::event::{StopReason, TokenUsage};

/// Which streaming wire dialect an upstream provider speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `choices[].delta` records (OpenAI Chat Completions and compatibles).
    #[default]
    OpenAi,
    /// Event-typed records (`message_start` / `content_block_delta` / ...).
    Anthropic,
}

/// One fragment of a logical tool call, keyed by the vendor's per-chunk slot
/// index. The index is stream-local; it is not a globally unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One fragment of reasoning content carried by a structured record field.
///
/// Inline-markup reasoning is not represented here; it is recovered from
/// `text` by the reasoning extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningFragment {
    /// Explicit ordering index from a detail array, when present.
    pub index: Option<u32>,
    pub text: String,
}

/// The dialect-independent reduction of one parsed wire record.
///
/// Both dialect decoders emit only this shape; everything downstream of them
/// is dialect-agnostic.
#[derive(Debug, Default)]
pub struct RecordFragments {
    pub text: Option<String>,
    pub tool_calls: SmallVec<[ToolCallFragment; 1]>,
    pub reasoning: SmallVec<[ReasoningFragment; 2]>,
    pub usage: Option<TokenUsage>,
    pub finish: Option<StopReason>,
    /// Dialect-level end-of-stream signal (Dialect B `message_stop`).
    pub end_of_stream: bool,
    /// Mid-stream vendor error payload, fatal to the request.
    pub error: Option<String>,
}

impl RecordFragments {
    /// Whether this record carried any content (text, tool-call, or
    /// reasoning fragments). Usage and finish signals are not content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
            || !self.tool_calls.is_empty()
            || self.reasoning.iter().any(|r| !r.text.is_empty())
    }
}
