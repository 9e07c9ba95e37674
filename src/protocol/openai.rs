use serde::Deserialize;
use smallvec::SmallVec;

use super::event::TokenUsage;
use super::mapping::openai_finish_to_canonical;
use super::{RecordFragments, ReasoningFragment, ToolCallFragment};

/// Dialect A stream record: `{choices: [{index, delta, finish_reason?}], usage?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
    #[serde(default)]
    pub error: Option<OpenAiErrorEnvelope>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCallDelta>>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<OpenAiReasoningField>,
    #[serde(default)]
    pub reasoning_details: Option<Vec<OpenAiReasoningDetail>>,
}

/// Some compatibles send `reasoning` as a plain string, others as an object
/// with a `text` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiReasoningField {
    Text(String),
    Structured {
        #[serde(default)]
        text: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiReasoningDetail {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default, rename = "type")]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiErrorEnvelope {
    #[serde(default)]
    pub message: Option<String>,
}

/// Marker substituted for encrypted or redacted reasoning detail elements.
pub const REDACTION_MARKER: &str = "[redacted]";

/// Reduce one Dialect A record to dialect-independent fragments.
///
/// The reduction is stateless: every field of the record maps directly to a
/// fragment. Reasoning detail arrays are sorted by their explicit `index`
/// before being appended, repairing out-of-order delivery within a record.
#[must_use]
pub fn reduce_openai_record(chunk: OpenAiStreamChunk) -> RecordFragments {
    let mut out = RecordFragments::default();

    if let Some(error) = chunk.error {
        out.error = Some(error.message.unwrap_or_else(|| "upstream error".to_owned()));
        return out;
    }

    for choice in chunk.choices {
        // Reads the delta by reference; content and tool_calls are moved out
        // below, so this has to come first.
        append_reasoning(&choice.delta, &mut out.reasoning);

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                match &mut out.text {
                    Some(text) => text.push_str(&content),
                    None => out.text = Some(content),
                }
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                let (name, arguments) = match tc.function {
                    Some(func) => (func.name, func.arguments),
                    None => (None, None),
                };
                out.tool_calls.push(ToolCallFragment {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                });
            }
        }

        if let Some(finish) = choice.finish_reason.as_deref() {
            out.finish = Some(openai_finish_to_canonical(finish));
        }
    }

    if let Some(usage) = chunk.usage {
        out.usage = Some(TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
    }

    out
}

/// A structured detail array, if present and non-empty, takes priority over
/// the simple reasoning fields; only one encoding is honored per record.
fn append_reasoning(delta: &OpenAiDelta, out: &mut SmallVec<[ReasoningFragment; 2]>) {
    if let Some(details) = delta.reasoning_details.as_deref() {
        if !details.is_empty() {
            let mut sorted: SmallVec<[&OpenAiReasoningDetail; 4]> = details.iter().collect();
            sorted.sort_by_key(|d| d.index.unwrap_or(u32::MAX));
            for detail in sorted {
                let text = detail_text(detail);
                if !text.is_empty() {
                    out.push(ReasoningFragment {
                        index: detail.index,
                        text,
                    });
                }
            }
            return;
        }
    }

    let simple = delta
        .reasoning_content
        .clone()
        .or_else(|| match &delta.reasoning {
            Some(OpenAiReasoningField::Text(text)) => Some(text.clone()),
            Some(OpenAiReasoningField::Structured { text }) => text.clone(),
            None => None,
        });
    if let Some(text) = simple {
        if !text.is_empty() {
            out.push(ReasoningFragment { index: None, text });
        }
    }
}

fn detail_text(detail: &OpenAiReasoningDetail) -> String {
    let detail_type = detail.detail_type.as_deref().unwrap_or("");
    if detail_type.contains("encrypted") || detail_type.contains("redacted") {
        return REDACTION_MARKER.to_owned();
    }
    if let Some(text) = detail.text.as_deref() {
        return text.to_owned();
    }
    detail.summary.clone().unwrap_or_default()
}
