use serde::Serialize;

/// Reason a canonical stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolCalls,
    Error,
}

/// Token accounting for one stream, merged across partial vendor reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// A single event in a canonical stream.
///
/// Events are append-only and ordered; no event is revised after emission.
/// Tool-call arguments are always a parsed value, never a raw string: a
/// `ToolCall` is only emitted once its argument buffer parses, exactly once
/// per logical call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        id: String,
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    Usage(TokenUsage),
    StreamEnd {
        reason: StopReason,
    },
}

impl TokenUsage {
    /// Merge a later partial report into this one; later non-`None` fields
    /// win. A total is never derived here; partials keep arriving, so the
    /// derivation happens once at [`TokenUsage::with_derived_total`].
    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }

    /// Fill in a missing total from input + output, when both exist.
    #[must_use]
    pub fn with_derived_total(mut self) -> TokenUsage {
        if self.total_tokens.is_none() {
            if let (Some(input), Some(output)) = (self.input_tokens, self.output_tokens) {
                self.total_tokens = Some(input + output);
            }
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_total() {
        let mut usage = TokenUsage {
            input_tokens: Some(12),
            ..TokenUsage::default()
        };
        usage.merge(TokenUsage {
            output_tokens: Some(30),
            ..TokenUsage::default()
        });
        assert_eq!(usage.total_tokens, None);
        assert_eq!(usage.with_derived_total().total_tokens, Some(42));
    }

    #[test]
    fn test_merge_prefers_later_values() {
        let mut usage = TokenUsage {
            output_tokens: Some(1),
            ..TokenUsage::default()
        };
        usage.merge(TokenUsage {
            output_tokens: Some(7),
            ..TokenUsage::default()
        });
        assert_eq!(usage.output_tokens, Some(7));
    }

    #[test]
    fn test_explicit_total_wins() {
        let mut usage = TokenUsage::default();
        usage.merge(TokenUsage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            total_tokens: Some(16),
        });
        assert_eq!(usage.total_tokens, Some(16));
    }
}
