//! Error types and the stable error-code vocabulary

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes consumed by transports and UIs.
///
/// These serialize as SCREAMING_SNAKE_CASE strings on the wire; renaming
/// a variant is a breaking protocol change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ToolInputInvalid,
    ToolNotFound,
    ToolTimeout,
    ToolExecutionFailed,
    ToolResultTooLarge,
    UserRejected,
    ApprovalTimeout,
    MaxIterationsExceeded,
    McpTimeout,
    Cancelled,
    ProviderError,
    ConversationBusy,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolInputInvalid => "TOOL_INPUT_INVALID",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ToolResultTooLarge => "TOOL_RESULT_TOO_LARGE",
            Self::UserRejected => "USER_REJECTED",
            Self::ApprovalTimeout => "APPROVAL_TIMEOUT",
            Self::MaxIterationsExceeded => "MAX_ITERATIONS_EXCEEDED",
            Self::McpTimeout => "MCP_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ConversationBusy => "CONVERSATION_BUSY",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{label}")]
    Timeout { label: String, code: ErrorCode },

    #[error("cancelled")]
    Cancelled,

    #[error("conversation busy: {0}")]
    ConversationBusy(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("no provider registered for {0}")]
    NoProvider(String),

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("api key unavailable: {0}")]
    ApiKeyUnavailable(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn timeout(label: impl Into<String>, code: ErrorCode) -> Self {
        Self::Timeout {
            label: label.into(),
            code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable code for this error, when one applies.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Timeout { code, .. } => Some(*code),
            Self::Cancelled => Some(ErrorCode::Cancelled),
            Self::ConversationBusy(_) => Some(ErrorCode::ConversationBusy),
            _ => None,
        }
    }
}
