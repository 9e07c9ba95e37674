use rustc_hash::FxHashMap;
use serde::Deserialize;

use super::event::TokenUsage;
use super::mapping::anthropic_finish_to_canonical;
use super::{RecordFragments, ReasoningFragment, ToolCallFragment};

/// Dialect B stream record, discriminated by its `type` field.
///
/// Unknown types deserialize as [`AnthropicStreamEvent::Unknown`] so a future
/// vendor event kind never breaks the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: AnthropicMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: u32,
        content_block: AnthropicContentBlock,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: AnthropicDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: AnthropicMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "error")]
    Error { error: AnthropicError },
    #[serde(untagged)]
    Unknown(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageStart {
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(untagged)]
    Unknown(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(untagged)]
    Unknown(serde::de::IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicError {
    #[serde(default)]
    pub message: String,
}

/// What kind of content a started block carries, learned at
/// `content_block_start` and consulted for the block's deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
    Thinking,
    Other,
}

/// Stateful Dialect B record reducer.
///
/// One instance per stream: `content_block_start` records the kind of each
/// block index so later deltas referencing that index route to the right
/// fragment kind even when the delta type alone would be ambiguous.
#[derive(Debug, Default)]
pub struct AnthropicRecordDecoder {
    blocks: FxHashMap<u32, BlockKind>,
}

impl AnthropicRecordDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one Dialect B record to dialect-independent fragments.
    pub fn reduce(&mut self, event: AnthropicStreamEvent) -> RecordFragments {
        let mut out = RecordFragments::default();
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    out.usage = Some(TokenUsage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        total_tokens: None,
                    });
                }
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlock::Text { text } => {
                    self.blocks.insert(index, BlockKind::Text);
                    if !text.is_empty() {
                        out.text = Some(text);
                    }
                }
                AnthropicContentBlock::ToolUse { id, name } => {
                    self.blocks.insert(index, BlockKind::ToolUse);
                    out.tool_calls.push(ToolCallFragment {
                        index,
                        id: Some(id),
                        name: Some(name),
                        arguments: None,
                    });
                }
                AnthropicContentBlock::Thinking { thinking } => {
                    self.blocks.insert(index, BlockKind::Thinking);
                    if !thinking.is_empty() {
                        out.reasoning.push(ReasoningFragment {
                            index: None,
                            text: thinking,
                        });
                    }
                }
                AnthropicContentBlock::Unknown(_) => {
                    self.blocks.insert(index, BlockKind::Other);
                    tracing::debug!(index, "ignoring unknown content block kind");
                }
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        out.text = Some(text);
                    }
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if self.blocks.get(&index) != Some(&BlockKind::ToolUse) {
                        tracing::debug!(index, "input_json_delta for a block never announced as tool_use");
                    }
                    out.tool_calls.push(ToolCallFragment {
                        index,
                        id: None,
                        name: None,
                        arguments: Some(partial_json),
                    });
                }
                AnthropicDelta::ThinkingDelta { thinking } => {
                    if !thinking.is_empty() {
                        out.reasoning.push(ReasoningFragment {
                            index: None,
                            text: thinking,
                        });
                    }
                }
                AnthropicDelta::Unknown(_) => {
                    tracing::debug!(index, "ignoring unknown content block delta kind");
                }
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                self.blocks.remove(&index);
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    out.usage = Some(TokenUsage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        total_tokens: None,
                    });
                }
                if let Some(reason) = delta.stop_reason.as_deref() {
                    out.finish = Some(anthropic_finish_to_canonical(reason));
                }
            }
            AnthropicStreamEvent::MessageStop {} => {
                out.end_of_stream = true;
            }
            AnthropicStreamEvent::Ping {} => {}
            AnthropicStreamEvent::Error { error } => {
                out.error = Some(error.message);
            }
            AnthropicStreamEvent::Unknown(_) => {
                tracing::debug!("ignoring unknown stream event type");
            }
        }
        out
    }
}
