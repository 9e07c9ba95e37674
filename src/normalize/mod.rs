pub mod anthropic;
pub mod openai;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Role of a host conversation turn. `Other` captures roles the host invented
/// that no vendor schema knows about; normalization maps them to user and
/// logs the fallback rather than dropping the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    User,
    Assistant,
    System,
    #[serde(untagged)]
    Other(String),
}

/// A single part of a host message's content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Base64 image payload with its media type.
    Image {
        media_type: String,
        data: String,
    },
    /// An assistant-issued tool invocation.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The host-side result of a prior tool invocation.
    ToolResult {
        call_id: String,
        content: String,
    },
    /// Reserved cache-control marker; dropped during normalization with no
    /// textual trace.
    CacheHint,
    /// A part kind the bridge does not understand; replaced by a placeholder.
    Opaque {
        kind: String,
    },
}

/// One turn of the host conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMessage {
    pub role: HostRole,
    pub parts: SmallVec<[ContentPart; 1]>,
}

impl HostMessage {
    #[must_use]
    pub fn text(role: HostRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: smallvec::smallvec![ContentPart::Text(text.into())],
        }
    }
}

/// The ordered host conversation handed to the normalizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    pub messages: Vec<HostMessage>,
}

/// A tool the host exposes to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// Per-request model capability descriptor, consumed read-only.
///
/// `image_input` is tri-state: images are replaced by placeholders only when
/// it is explicitly `Some(false)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub tool_calling: bool,
    pub image_input: Option<bool>,
}

impl ModelCapabilities {
    #[must_use]
    pub(crate) fn images_allowed(self) -> bool {
        self.image_input != Some(false)
    }
}

/// Generation parameters passed through to the vendor request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

/// Read-only aggregate over a normalized message list, for diagnostics only.
/// Never consulted for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub system_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_messages: usize,
    pub content_chars: usize,
    pub tool_calls: usize,
    pub tool_results: usize,
}

impl ConversionStats {
    pub(crate) fn log(&self) {
        tracing::debug!(
            system = self.system_messages,
            user = self.user_messages,
            assistant = self.assistant_messages,
            tool = self.tool_messages,
            chars = self.content_chars,
            tool_calls = self.tool_calls,
            tool_results = self.tool_results,
            "normalized conversation"
        );
    }
}

/// Placeholder for an image the target model cannot accept.
pub(crate) fn image_placeholder(media_type: &str, data: &str) -> String {
    format!(
        "[image omitted: {media_type}, ~{} bytes]",
        crate::util::base64_decoded_len(data)
    )
}

/// Placeholder for a part kind the bridge does not understand.
pub(crate) fn opaque_placeholder(kind: &str) -> String {
    format!("[unsupported content: {kind}]")
}

/// True when the turn's content, ignoring cache hints, is entirely tool
/// results (and non-empty). Such turns become tool-result messages only.
pub(crate) fn is_pure_tool_result_turn(message: &HostMessage) -> bool {
    let mut saw_result = false;
    for part in &message.parts {
        match part {
            ContentPart::ToolResult { .. } => saw_result = true,
            ContentPart::CacheHint => {}
            _ => return false,
        }
    }
    saw_result
}
