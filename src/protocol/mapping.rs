use super::event::StopReason;
use crate::normalize::HostRole;

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

/// Map a host role to its Dialect A wire string. The mapping is total; an
/// unrecognized role falls back to "user" (the caller logs the fallback).
#[must_use]
pub fn host_role_to_openai(role: &HostRole) -> &'static str {
    match role {
        HostRole::System => "system",
        HostRole::User | HostRole::Other(_) => "user",
        HostRole::Assistant => "assistant",
    }
}

/// Map a host role to its Dialect B wire string. Dialect B has no system
/// role in messages; system content is a top-level field.
#[must_use]
pub fn host_role_to_anthropic(role: &HostRole) -> &'static str {
    match role {
        HostRole::Assistant => "assistant",
        HostRole::System | HostRole::User | HostRole::Other(_) => "user",
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Map a Dialect A `finish_reason` to the canonical stop reason. Length and
/// content-filter stops have no canonical counterpart and map to `Stop`.
#[must_use]
pub fn openai_finish_to_canonical(s: &str) -> StopReason {
    match s {
        "tool_calls" | "function_call" => StopReason::ToolCalls,
        _ => StopReason::Stop,
    }
}

/// Map a Dialect B `stop_reason` to the canonical stop reason.
#[must_use]
pub fn anthropic_finish_to_canonical(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolCalls,
        _ => StopReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_finish_mapping() {
        assert_eq!(openai_finish_to_canonical("stop"), StopReason::Stop);
        assert_eq!(openai_finish_to_canonical("length"), StopReason::Stop);
        assert_eq!(
            openai_finish_to_canonical("tool_calls"),
            StopReason::ToolCalls
        );
        assert_eq!(
            openai_finish_to_canonical("function_call"),
            StopReason::ToolCalls
        );
    }

    #[test]
    fn test_anthropic_finish_mapping() {
        assert_eq!(anthropic_finish_to_canonical("end_turn"), StopReason::Stop);
        assert_eq!(
            anthropic_finish_to_canonical("max_tokens"),
            StopReason::Stop
        );
        assert_eq!(
            anthropic_finish_to_canonical("tool_use"),
            StopReason::ToolCalls
        );
    }

    #[test]
    fn test_role_mapping_is_total() {
        let other = HostRole::Other("critic".to_string());
        assert_eq!(host_role_to_openai(&other), "user");
        assert_eq!(host_role_to_anthropic(&other), "user");
        assert_eq!(host_role_to_openai(&HostRole::System), "system");
        assert_eq!(host_role_to_anthropic(&HostRole::System), "user");
    }
}
