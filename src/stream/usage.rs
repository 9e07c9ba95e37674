use crate::protocol::event::{StopReason, TokenUsage};

/// Tracks token accounting and the vendor completion signal for one stream.
///
/// Dialect A reports usage once; Dialect B splits it across `message_start`
/// (input) and `message_delta` (output). Partials are merged and surfaced as
/// a single canonical report at finalize.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: TokenUsage,
    seen_usage: bool,
    finish: Option<StopReason>,
}

impl UsageTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_usage(&mut self, partial: TokenUsage) {
        self.usage.merge(partial);
        self.seen_usage = true;
    }

    pub fn record_finish(&mut self, reason: StopReason) {
        self.finish = Some(reason);
    }

    /// The merged usage report, when any vendor accounting was seen.
    #[must_use]
    pub fn report(&self) -> Option<TokenUsage> {
        self.seen_usage.then(|| self.usage.with_derived_total())
    }

    /// The vendor's completion signal, if one arrived.
    #[must_use]
    pub fn finish(&self) -> Option<StopReason> {
        self.finish
    }

    /// Canonical termination reason for a naturally-ended stream.
    #[must_use]
    pub fn stop_reason(&self) -> StopReason {
        self.finish.unwrap_or(StopReason::Stop)
    }
}
