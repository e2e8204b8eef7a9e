//! Execution context handed to every tool call

use switchboard_core::ConversationId;

/// Per-call context: which conversation and agent is invoking the tool,
/// plus any opaque context the frontend attached to the turn.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub user_id: Option<String>,
    pub frontend_context: Option<serde_json::Value>,
    pub agent_id: String,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<ConversationId>, agent_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
            frontend_context: None,
            agent_id: agent_id.into(),
        }
    }
}
