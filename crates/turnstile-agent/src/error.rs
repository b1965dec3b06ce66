//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.
//! [`ModelErrorKind`] turns model-call failures into user-facing categories;
//! the core itself never retries.

use uuid::Uuid;

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Model errors --------------------------------------------------------
    /// A request to the model provider failed.
    #[error("model request failed: {reason}")]
    ModelRequestFailed { reason: String },

    /// The model response could not be interpreted.
    #[error("model response parse error: {reason}")]
    ModelParseFailed { reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced by the model does not exist in the registry.
    #[error("unknown tool '{tool_name}'")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    // -- Runtime errors ------------------------------------------------------
    /// The run was cancelled before the model answered.
    #[error("task {task_id} cancelled")]
    Cancelled { task_id: Uuid },

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] turnstile_store::StoreError),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Model error classification
// ---------------------------------------------------------------------------

/// Coarse category of a failed model call, used to pick a message for the
/// user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    Timeout,
    Connection,
    RateLimit,
    Auth,
    Server,
    Other,
}

impl ModelErrorKind {
    /// Classify an error returned by a model client.
    pub fn classify(err: &AgentError) -> Self {
        let reason = match err {
            AgentError::ModelRequestFailed { reason } | AgentError::ModelParseFailed { reason } => {
                reason.to_lowercase()
            }
            AgentError::Io(e) => e.to_string().to_lowercase(),
            _ => return Self::Other,
        };

        let has = |needles: &[&str]| needles.iter().any(|n| reason.contains(n));

        if has(&["timeout", "timed out", "deadline exceeded"]) {
            Self::Timeout
        } else if has(&["rate limit", "rate_limit", "429", "too many requests", "quota"]) {
            Self::RateLimit
        } else if has(&["401", "403", "unauthorized", "forbidden", "api key", "authentication"]) {
            Self::Auth
        } else if has(&["connection", "connect", "dns", "network", "unreachable", "reset by peer"]) {
            Self::Connection
        } else if has(&["500", "502", "503", "504", "internal server error", "bad gateway", "overloaded"]) {
            Self::Server
        } else {
            Self::Other
        }
    }

    /// A short message suitable for showing to the user.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "The model provider took too long to respond. Try again in a moment.",
            Self::Connection => "Could not reach the model provider. Check your network connection.",
            Self::RateLimit => "The model provider is rate limiting requests. Wait a bit and retry.",
            Self::Auth => "The model provider rejected the credentials. Check your API key.",
            Self::Server => "The model provider reported a server error. Try again later.",
            Self::Other => "The model request failed.",
        }
    }
}
