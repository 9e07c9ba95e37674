use serde::Serialize;
use serde_json::Value;

use super::{
    image_placeholder, opaque_placeholder, ContentPart, Conversation, ConversionStats,
    GenerationParams, HostMessage, HostRole, ModelCapabilities, ToolDefinition,
};
use crate::protocol::mapping::host_role_to_anthropic;

/// Default output budget when the host supplies none; Dialect B requires an
/// explicit `max_tokens`.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Dialect B (event-typed) request wire type.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Build a Dialect B streaming request from a host conversation.
///
/// System turns never appear in the message list; their flattened text moves
/// to the top-level `system` field, preserving turn order.
#[must_use]
pub fn build_anthropic_request(
    model: &str,
    conversation: &Conversation,
    tools: &[ToolDefinition],
    capabilities: ModelCapabilities,
    params: GenerationParams,
) -> (AnthropicRequest, ConversionStats) {
    let mut stats = ConversionStats::default();
    let mut system_text: Option<String> = None;
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(conversation.messages.len());

    for message in &conversation.messages {
        match &message.role {
            HostRole::System => {
                let flattened = flatten_to_text(message);
                stats.system_messages += 1;
                stats.content_chars += flattened.len();
                match &mut system_text {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&flattened);
                    }
                    None => system_text = Some(flattened),
                }
            }
            HostRole::Assistant => {
                messages.push(assistant_message(message, &mut stats));
            }
            HostRole::User => {
                messages.push(user_message(message, capabilities, &mut stats));
            }
            HostRole::Other(role) => {
                tracing::warn!(role, "unrecognized host role; treating turn as user");
                messages.push(user_message(message, capabilities, &mut stats));
            }
        }
    }

    remove_dangling_tool_calls(&mut messages, &mut stats);
    stats.log();

    let tools = (capabilities.tool_calling && !tools.is_empty()).then(|| {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    });

    (
        AnthropicRequest {
            model: model.to_owned(),
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: system_text,
            messages,
            tools,
            stream: true,
            temperature: params.temperature,
            top_p: params.top_p,
        },
        stats,
    )
}

fn flatten_to_text(message: &HostMessage) -> String {
    let mut text = String::new();
    for part in &message.parts {
        let rendered = match part {
            ContentPart::Text(t) => t.clone(),
            ContentPart::Image { media_type, data } => image_placeholder(media_type, data),
            ContentPart::Opaque { kind } => opaque_placeholder(kind),
            ContentPart::ToolCall { name, .. } => format!("[tool call: {name}]"),
            ContentPart::ToolResult { call_id, .. } => format!("[tool result for {call_id}]"),
            ContentPart::CacheHint => continue,
        };
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&rendered);
    }
    text
}

fn assistant_message(message: &HostMessage, stats: &mut ConversionStats) -> AnthropicMessage {
    let mut blocks: Vec<Value> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();

    for part in &message.parts {
        match part {
            ContentPart::Text(t) => text_parts.push(t.clone()),
            ContentPart::Image { media_type, data } => {
                text_parts.push(image_placeholder(media_type, data));
            }
            ContentPart::Opaque { kind } => text_parts.push(opaque_placeholder(kind)),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                stats.tool_calls += 1;
                blocks.push(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments,
                }));
            }
            ContentPart::ToolResult { .. } | ContentPart::CacheHint => {}
        }
    }

    let joined = text_parts.join("\n");
    stats.assistant_messages += 1;
    stats.content_chars += joined.len();

    let content = if blocks.is_empty() {
        Value::String(joined)
    } else {
        let mut all: Vec<Value> = Vec::with_capacity(blocks.len() + 1);
        if !joined.is_empty() {
            all.push(serde_json::json!({"type": "text", "text": joined}));
        }
        all.extend(blocks);
        Value::Array(all)
    };
    AnthropicMessage {
        role: "assistant".to_owned(),
        content,
    }
}

/// Tool results become `tool_result` blocks leading the user message content;
/// remaining parts follow as text/image blocks.
fn user_message(
    message: &HostMessage,
    capabilities: ModelCapabilities,
    stats: &mut ConversionStats,
) -> AnthropicMessage {
    let mut result_blocks: Vec<Value> = Vec::new();
    let mut other_blocks: Vec<Value> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();
    let flush_text = |text_parts: &mut Vec<String>, blocks: &mut Vec<Value>| {
        if !text_parts.is_empty() {
            let joined = text_parts.join("\n");
            blocks.push(serde_json::json!({"type": "text", "text": joined}));
            text_parts.clear();
        }
    };

    for part in &message.parts {
        match part {
            ContentPart::ToolResult { call_id, content } => {
                stats.tool_results += 1;
                result_blocks.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                }));
            }
            ContentPart::Text(t) => text_parts.push(t.clone()),
            ContentPart::Image { media_type, data } => {
                if capabilities.images_allowed() {
                    flush_text(&mut text_parts, &mut other_blocks);
                    other_blocks.push(serde_json::json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }));
                } else {
                    text_parts.push(image_placeholder(media_type, data));
                }
            }
            ContentPart::Opaque { kind } => text_parts.push(opaque_placeholder(kind)),
            ContentPart::ToolCall { name, .. } => {
                text_parts.push(format!("[tool call: {name}]"));
            }
            ContentPart::CacheHint => {}
        }
    }
    flush_text(&mut text_parts, &mut other_blocks);

    stats.user_messages += 1;
    for block in &other_blocks {
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            stats.content_chars += text.len();
        }
    }

    // A plain text-only turn stays a string, matching the common wire shape.
    let only_text = result_blocks.is_empty()
        && other_blocks.len() == 1
        && other_blocks[0].get("type").and_then(Value::as_str) == Some("text");
    let content = if only_text {
        other_blocks[0]
            .get_mut("text")
            .map(Value::take)
            .unwrap_or_default()
    } else {
        let mut all = result_blocks;
        all.extend(other_blocks);
        if all.is_empty() {
            Value::String(String::new())
        } else {
            Value::Array(all)
        }
    };
    AnthropicMessage {
        role: host_role_to_anthropic(&message.role).to_owned(),
        content,
    }
}

/// Same integrity rule as Dialect A: an assistant message with a `tool_use`
/// block whose id never gets a later `tool_result` is removed entirely.
fn remove_dangling_tool_calls(messages: &mut Vec<AnthropicMessage>, stats: &mut ConversionStats) {
    fn block_ids<'a>(message: &'a AnthropicMessage, block_type: &str, id_key: &str) -> Vec<&'a str> {
        match &message.content {
            Value::Array(blocks) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some(block_type))
                .filter_map(|b| b.get(id_key).and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }

    let mut index = 0;
    while index < messages.len() {
        let call_ids = block_ids(&messages[index], "tool_use", "id");
        if call_ids.is_empty() {
            index += 1;
            continue;
        }
        let all_answered = call_ids.iter().all(|call_id| {
            messages[index + 1..]
                .iter()
                .any(|m| block_ids(m, "tool_result", "tool_use_id").contains(call_id))
        });
        if all_answered {
            index += 1;
        } else {
            messages.remove(index);
            if stats.assistant_messages > 0 {
                stats.assistant_messages -= 1;
            }
            tracing::warn!("removed assistant message with unanswered tool calls");
        }
    }
}
