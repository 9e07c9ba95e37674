use serde::Serialize;
use serde_json::Value;

use super::{
    image_placeholder, is_pure_tool_result_turn, opaque_placeholder, ContentPart, Conversation,
    ConversionStats, GenerationParams, HostMessage, HostRole, ModelCapabilities, ToolDefinition,
};
use crate::protocol::mapping::host_role_to_openai;

/// Dialect A (Chat Completions) request wire type.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<OpenAiStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub function: OpenAiToolCallFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiToolCallFunction {
    pub name: String,
    /// JSON-serialized argument object.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub type_: String,
    pub function: ToolDefinition,
}

/// Build a Dialect A streaming request from a host conversation.
///
/// Output is deterministic and order-preserving with respect to the input,
/// apart from the dangling-call integrity removals.
#[must_use]
pub fn build_openai_request(
    model: &str,
    conversation: &Conversation,
    tools: &[ToolDefinition],
    capabilities: ModelCapabilities,
    params: GenerationParams,
) -> (OpenAiChatRequest, ConversionStats) {
    let mut messages: Vec<OpenAiMessage> = Vec::with_capacity(conversation.messages.len());

    for message in &conversation.messages {
        match &message.role {
            HostRole::System => messages.push(system_message(message)),
            HostRole::Assistant => messages.push(assistant_message(message)),
            HostRole::User => user_messages(message, capabilities, &mut messages),
            HostRole::Other(role) => {
                tracing::warn!(role, "unrecognized host role; treating turn as user");
                user_messages(message, capabilities, &mut messages);
            }
        }
    }

    remove_dangling_tool_calls(&mut messages);

    let stats = conversion_stats(&messages);
    stats.log();

    let tools = (capabilities.tool_calling && !tools.is_empty()).then(|| {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                type_: "function".to_owned(),
                function: tool.clone(),
            })
            .collect()
    });

    (
        OpenAiChatRequest {
            model: model.to_owned(),
            messages,
            tools,
            stream: true,
            stream_options: Some(OpenAiStreamOptions {
                include_usage: true,
            }),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        },
        stats,
    )
}

/// System content always flattens to one plain string; empty content becomes
/// an explicit empty string rather than being omitted.
fn system_message(message: &HostMessage) -> OpenAiMessage {
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
    OpenAiMessage {
        role: "system".to_owned(),
        content: Some(Value::String(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

fn assistant_message(message: &HostMessage) -> OpenAiMessage {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    for part in &message.parts {
        match part {
            ContentPart::Text(t) => text_parts.push(t.clone()),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => tool_calls.push(OpenAiToolCall {
                id: id.clone(),
                type_: "function".to_owned(),
                function: OpenAiToolCallFunction {
                    name: name.clone(),
                    arguments: arguments.to_string(),
                },
            }),
            ContentPart::Image { media_type, data } => {
                text_parts.push(image_placeholder(media_type, data));
            }
            ContentPart::Opaque { kind } => text_parts.push(opaque_placeholder(kind)),
            ContentPart::ToolResult { .. } | ContentPart::CacheHint => {}
        }
    }

    let joined = text_parts.join("\n");
    let content = if joined.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(Value::String(joined))
    };
    OpenAiMessage {
        role: "assistant".to_owned(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// A user turn may expand into several wire messages: one `tool` message per
/// tool result, plus (unless the turn was entirely tool results) one user
/// message carrying the remaining flattened content.
fn user_messages(
    message: &HostMessage,
    capabilities: ModelCapabilities,
    out: &mut Vec<OpenAiMessage>,
) {
    for part in &message.parts {
        if let ContentPart::ToolResult { call_id, content } = part {
            out.push(OpenAiMessage {
                role: "tool".to_owned(),
                content: Some(Value::String(content.clone())),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            });
        }
    }
    if is_pure_tool_result_turn(message) {
        return;
    }

    let mut text_parts: Vec<String> = Vec::new();
    let mut image_parts: Vec<Value> = Vec::new();

    for part in &message.parts {
        match part {
            ContentPart::Text(t) => text_parts.push(t.clone()),
            ContentPart::Image { media_type, data } => {
                if capabilities.images_allowed() {
                    image_parts.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{media_type};base64,{data}")},
                    }));
                } else {
                    text_parts.push(image_placeholder(media_type, data));
                }
            }
            ContentPart::Opaque { kind } => text_parts.push(opaque_placeholder(kind)),
            ContentPart::ToolCall { name, .. } => {
                text_parts.push(format!("[tool call: {name}]"));
            }
            ContentPart::ToolResult { .. } | ContentPart::CacheHint => {}
        }
    }

    let joined = text_parts.join("\n");
    let role = host_role_to_openai(&message.role).to_owned();
    let content = if image_parts.is_empty() {
        Value::String(joined)
    } else {
        let mut parts: Vec<Value> = Vec::with_capacity(1 + image_parts.len());
        if !joined.is_empty() {
            parts.push(serde_json::json!({"type": "text", "text": joined}));
        }
        parts.extend(image_parts);
        Value::Array(parts)
    };
    out.push(OpenAiMessage {
        role,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
}

/// Drop any assistant message whose tool calls lack a matching tool-result
/// message later in the conversation. The message is removed entirely, never
/// trimmed, so the vendor never sees a dangling call reference.
fn remove_dangling_tool_calls(messages: &mut Vec<OpenAiMessage>) {
    let mut index = 0;
    while index < messages.len() {
        let Some(tool_calls) = messages[index].tool_calls.as_deref() else {
            index += 1;
            continue;
        };
        let all_answered = tool_calls.iter().all(|call| {
            messages[index + 1..].iter().any(|candidate| {
                candidate.role == "tool" && candidate.tool_call_id.as_deref() == Some(&call.id)
            })
        });
        if all_answered {
            index += 1;
        } else {
            let removed = messages.remove(index);
            tracing::warn!(
                calls = removed.tool_calls.map_or(0, |calls| calls.len()),
                "removed assistant message with unanswered tool calls"
            );
        }
    }
}

fn conversion_stats(messages: &[OpenAiMessage]) -> ConversionStats {
    let mut stats = ConversionStats::default();
    for message in messages {
        match message.role.as_str() {
            "system" => stats.system_messages += 1,
            "assistant" => stats.assistant_messages += 1,
            "tool" => {
                stats.tool_messages += 1;
                stats.tool_results += 1;
            }
            _ => stats.user_messages += 1,
        }
        match &message.content {
            Some(Value::String(text)) => stats.content_chars += text.len(),
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        stats.content_chars += text.len();
                    }
                }
            }
            _ => {}
        }
        stats.tool_calls += message.tool_calls.as_deref().map_or(0, <[_]>::len);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn caps() -> ModelCapabilities {
        ModelCapabilities {
            tool_calling: true,
            image_input: None,
        }
    }

    fn build(conversation: &Conversation) -> OpenAiChatRequest {
        build_openai_request(
            "gpt-4o",
            conversation,
            &[],
            caps(),
            GenerationParams::default(),
        )
        .0
    }

    #[test]
    fn test_simple_text_conversation() {
        let conversation = Conversation {
            messages: vec![
                HostMessage::text(HostRole::System, "be brief"),
                HostMessage::text(HostRole::User, "hi"),
            ],
        };
        let request = build(&conversation);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(
            request.messages[1].content,
            Some(Value::String("hi".into()))
        );
        assert!(request.stream);
    }

    #[test]
    fn test_unrecognized_role_falls_back_to_user() {
        let conversation = Conversation {
            messages: vec![HostMessage::text(HostRole::Other("critic".into()), "nope")],
        };
        let request = build(&conversation);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_pure_tool_result_turn_becomes_tool_messages_only() {
        let conversation = Conversation {
            messages: vec![
                HostMessage {
                    role: HostRole::Assistant,
                    parts: smallvec![ContentPart::ToolCall {
                        id: "call_1".into(),
                        name: "lookup".into(),
                        arguments: serde_json::json!({"q": "rust"}),
                    }],
                },
                HostMessage {
                    role: HostRole::User,
                    parts: smallvec![
                        ContentPart::ToolResult {
                            call_id: "call_1".into(),
                            content: "found".into(),
                        },
                        ContentPart::ToolResult {
                            call_id: "call_1".into(),
                            content: "more".into(),
                        },
                    ],
                },
            ],
        };
        let request = build(&conversation);
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["assistant", "tool", "tool"]);
        assert_eq!(request.messages[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_mixed_turn_emits_results_then_user_message() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::User,
                parts: smallvec![
                    ContentPart::ToolResult {
                        call_id: "call_9".into(),
                        content: "42".into(),
                    },
                    ContentPart::Text("so what now?".into()),
                ],
            }],
        };
        let request = build(&conversation);
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["tool", "user"]);
    }

    #[test]
    fn test_images_inlined_when_allowed() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::User,
                parts: smallvec![
                    ContentPart::Text("what is this".into()),
                    ContentPart::Image {
                        media_type: "image/png".into(),
                        data: "aGVsbG8=".into(),
                    },
                ],
            }],
        };
        let request = build(&conversation);
        let Some(Value::Array(parts)) = &request.messages[0].content else {
            panic!("expected array content");
        };
        assert_eq!(parts.len(), 2);
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_images_replaced_when_disallowed() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::User,
                parts: smallvec![ContentPart::Image {
                    media_type: "image/png".into(),
                    data: "aGVsbG8=".into(),
                }],
            }],
        };
        let (request, _) = build_openai_request(
            "gpt-4o",
            &conversation,
            &[],
            ModelCapabilities {
                tool_calling: false,
                image_input: Some(false),
            },
            GenerationParams::default(),
        );
        let Some(Value::String(text)) = &request.messages[0].content else {
            panic!("expected string content");
        };
        assert!(text.starts_with("[image omitted: image/png"));
    }

    #[test]
    fn test_cache_hint_leaves_no_trace() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::User,
                parts: smallvec![ContentPart::Text("hello".into()), ContentPart::CacheHint],
            }],
        };
        let request = build(&conversation);
        assert_eq!(
            request.messages[0].content,
            Some(Value::String("hello".into()))
        );
    }

    #[test]
    fn test_system_multimodal_flattens_to_string() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::System,
                parts: smallvec![
                    ContentPart::Text("rules".into()),
                    ContentPart::Opaque {
                        kind: "audio".into()
                    },
                ],
            }],
        };
        let request = build(&conversation);
        assert_eq!(
            request.messages[0].content,
            Some(Value::String(
                "rules\n[unsupported content: audio]".into()
            ))
        );
    }

    #[test]
    fn test_empty_system_becomes_empty_string() {
        let conversation = Conversation {
            messages: vec![HostMessage {
                role: HostRole::System,
                parts: smallvec![],
            }],
        };
        let request = build(&conversation);
        assert_eq!(
            request.messages[0].content,
            Some(Value::String(String::new()))
        );
    }

    #[test]
    fn test_dangling_tool_call_removed_entirely() {
        let conversation = Conversation {
            messages: vec![
                HostMessage {
                    role: HostRole::Assistant,
                    parts: smallvec![
                        ContentPart::Text("checking".into()),
                        ContentPart::ToolCall {
                            id: "call_lost".into(),
                            name: "lookup".into(),
                            arguments: serde_json::json!({}),
                        },
                    ],
                },
                HostMessage::text(HostRole::User, "never mind"),
            ],
        };
        let request = build(&conversation);
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user"]);
    }

    #[test]
    fn test_answered_tool_call_survives() {
        let conversation = Conversation {
            messages: vec![
                HostMessage {
                    role: HostRole::Assistant,
                    parts: smallvec![ContentPart::ToolCall {
                        id: "call_ok".into(),
                        name: "lookup".into(),
                        arguments: serde_json::json!({"q": 1}),
                    }],
                },
                HostMessage {
                    role: HostRole::User,
                    parts: smallvec![ContentPart::ToolResult {
                        call_id: "call_ok".into(),
                        content: "done".into(),
                    }],
                },
            ],
        };
        let request = build(&conversation);
        assert_eq!(request.messages.len(), 2);
        let calls = request.messages[0].tool_calls.as_deref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"q\":1}");
    }

    #[test]
    fn test_tools_included_only_with_capability() {
        let tools = vec![ToolDefinition {
            name: "lookup".into(),
            description: None,
            parameters: serde_json::json!({"type": "object"}),
        }];
        let conversation = Conversation {
            messages: vec![HostMessage::text(HostRole::User, "hi")],
        };
        let (with_tools, _) = build_openai_request(
            "gpt-4o",
            &conversation,
            &tools,
            caps(),
            GenerationParams::default(),
        );
        assert!(with_tools.tools.is_some());

        let (without, _) = build_openai_request(
            "gpt-4o",
            &conversation,
            &tools,
            ModelCapabilities::default(),
            GenerationParams::default(),
        );
        assert!(without.tools.is_none());
    }

    #[test]
    fn test_stats_counts() {
        let conversation = Conversation {
            messages: vec![
                HostMessage::text(HostRole::System, "sys"),
                HostMessage::text(HostRole::User, "hello"),
            ],
        };
        let (_, stats) = build_openai_request(
            "gpt-4o",
            &conversation,
            &[],
            caps(),
            GenerationParams::default(),
        );
        assert_eq!(stats.system_messages, 1);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.content_chars, "sys".len() + "hello".len());
    }
}
