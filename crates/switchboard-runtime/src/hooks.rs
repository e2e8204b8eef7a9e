//! Lifecycle hooks, all best-effort

use serde_json::Value;
use switchboard_core::ConversationId;
use switchboard_tools::HookResult;

#[derive(Clone, Debug)]
pub struct TurnInfo {
    pub conversation_id: ConversationId,
    pub agent_id: String,
    pub user_message: String,
}

/// Observation points around a turn and its tool calls. Failures are
/// logged and never affect the turn.
#[async_trait::async_trait]
pub trait RuntimeHooks: Send + Sync {
    async fn on_turn_start(&self, _turn: &TurnInfo) -> HookResult {
        Ok(())
    }

    async fn on_turn_end(&self, _turn: &TurnInfo) -> HookResult {
        Ok(())
    }

    async fn on_tool_call(&self, _name: &str, _args: &Value) -> HookResult {
        Ok(())
    }

    async fn on_tool_result(&self, _name: &str, _result: &Value) -> HookResult {
        Ok(())
    }
}

pub struct NoopHooks;

#[async_trait::async_trait]
impl RuntimeHooks for NoopHooks {}
