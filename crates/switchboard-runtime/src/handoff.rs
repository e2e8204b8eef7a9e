//! Handoff engine — synthetic tools that transfer the conversation
//!
//! Each agent gets one `handoff_to_<target>` tool per declared routing
//! target. Invoking one produces a `ToolOutcome::Handoff`, which the
//! dispatch sequence intercepts instead of emitting a tool result.

use crate::agent::AgentDefinition;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_tools::{Tool, ToolContext, ToolError, ToolOutcome};

pub const HANDOFF_PREFIX: &str = "handoff_to_";

pub fn is_handoff_tool(name: &str) -> bool {
    name.starts_with(HANDOFF_PREFIX)
}

pub fn handoff_target(name: &str) -> Option<&str> {
    name.strip_prefix(HANDOFF_PREFIX)
}

struct HandoffTool {
    name: String,
    target_id: String,
    description: String,
}

#[async_trait::async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why the conversation is being transferred"
                },
                "context": {
                    "type": "string",
                    "description": "Optional context to pass to the receiving agent"
                }
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Handoff {
            target: self.target_id.clone(),
            reason: args["reason"].as_str().unwrap_or_default().to_string(),
            context: args["context"].as_str().map(String::from),
        })
    }
}

/// Synthesize handoff tools for an agent's declared routing targets.
///
/// Targets missing from the agent map are skipped. Output is sorted by
/// target id so it is stable regardless of map iteration order.
pub fn generate_handoff_tools(
    agent: &AgentDefinition,
    agents: &HashMap<String, Arc<AgentDefinition>>,
) -> Vec<Arc<dyn Tool>> {
    let mut targets: Vec<&String> = agent
        .can_handoff_to
        .iter()
        .filter(|id| agents.contains_key(*id))
        .collect();
    targets.sort();
    targets.dedup();

    targets
        .into_iter()
        .map(|target_id| {
            let target = &agents[target_id];
            Arc::new(HandoffTool {
                name: format!("{}{}", HANDOFF_PREFIX, target_id),
                target_id: target_id.clone(),
                description: format!(
                    "Transfer the conversation to {}. {}",
                    target.name, target.description
                ),
            }) as Arc<dyn Tool>
        })
        .collect()
}
