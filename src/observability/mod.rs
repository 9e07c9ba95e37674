use tracing_subscriber::EnvFilter;

use crate::protocol::event::TokenUsage;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log token usage for a completed stream, computing duration from start time.
pub fn log_stream_complete(
    model: &str,
    usage: Option<&TokenUsage>,
    start_time: std::time::Instant,
) {
    let elapsed_ms = start_time.elapsed().as_millis();
    match usage {
        Some(usage) => tracing::info!(
            model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total_tokens,
            elapsed_ms,
            "stream complete"
        ),
        None => tracing::info!(model, elapsed_ms, "stream complete, no usage reported"),
    }
}
