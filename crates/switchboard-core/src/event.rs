//! Runtime event stream — the wire contract
//!
//! Every event is a JSON object with a `type` discriminator and camelCase
//! fields. Transports serialize events as-is; the SSE framing puts the
//! type on the `event:` line and the JSON body on the `data:` line:
//!
//!   event: text-delta
//!   data: {"type":"text-delta","messageId":"m-1","delta":"Hel"}
//!
//! Field and type names are stable; breaking changes require a version bump.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Tagged union emitted on the output stream of a turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    TextComplete { message_id: String, content: String },

    /// Extended-thinking stream, when the provider exposes one.
    #[serde(rename_all = "camelCase")]
    ReasoningDelta { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        agent_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallArgs {
        tool_call_id: String,
        args: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        tool_call_id: String,
        result: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallError {
        tool_call_id: String,
        error: String,
        code: ErrorCode,
    },

    #[serde(rename_all = "camelCase")]
    ApprovalRequired {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
        agent_id: String,
    },

    #[serde(rename_all = "camelCase")]
    AgentHandoff {
        from: String,
        to: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    Error { error: String, code: ErrorCode },
}

impl RuntimeEvent {
    /// Wire name of this event, as used on the SSE `event:` line.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::TextComplete { .. } => "text-complete",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallArgs { .. } => "tool-call-args",
            Self::ToolCallResult { .. } => "tool-call-result",
            Self::ToolCallError { .. } => "tool-call-error",
            Self::ApprovalRequired { .. } => "approval-required",
            Self::AgentHandoff { .. } => "agent-handoff",
            Self::Error { .. } => "error",
        }
    }

    /// True for events that end the turn's stream.
    ///
    /// A handoff is not terminal: the turn continues under the new agent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TextComplete { .. } | Self::Error { .. })
    }

    /// Encode as one SSE frame (`event:` line + `data:` line + blank line).
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"error\",\"error\":\"serialization failed: {}\",\"code\":\"PROVIDER_ERROR\"}}",
                e
            )
        });
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }

    pub fn error(error: impl Into<String>, code: ErrorCode) -> Self {
        Self::Error {
            error: error.into(),
            code,
        }
    }
}
