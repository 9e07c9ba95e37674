/// Canonical error type used across all modules.
///
/// Everything here is fatal to the request that raised it: recoverable
/// conditions (malformed individual records, partial tool-call arguments at a
/// generic stream end) are logged and absorbed at the site that sees them and
/// never surface as an `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Missing credential: {0}")]
    Credential(String),
    #[error("Transport error: {0}")]
    Transport(String),
    /// `status` is `None` for in-band error records carried inside an
    /// otherwise successful response stream.
    #[error("Upstream error: status={}, message={message}", .status.map_or_else(|| "none".to_owned(), |s| s.to_string()))]
    Upstream {
        status: Option<u16>,
        message: String,
    },
    #[error("Protocol translation error: {0}")]
    Decode(String),
    #[error("Incomplete tool call '{name}' at tool-calls finish: {detail}")]
    IncompleteToolCall { name: String, detail: String },
    #[error("Stream produced no content")]
    NoContent,
}

/// Broad error category, used for logging and host-side triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Precondition,
    Transport,
    Upstream,
    Protocol,
}

impl Error {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::Credential(_) => ErrorCategory::Precondition,
            Error::Transport(_) => ErrorCategory::Transport,
            Error::Upstream { .. } => ErrorCategory::Upstream,
            Error::Decode(_) | Error::IncompleteToolCall { .. } | Error::NoContent => {
                ErrorCategory::Protocol
            }
        }
    }
}
