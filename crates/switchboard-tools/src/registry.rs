//! Tool trait, outcomes, and the registry

use crate::context::ToolContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::ErrorCode;
use switchboard_llm::ToolSpec;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("tool execution timed out")]
    Timeout,

    #[error("mcp call timed out")]
    McpTimeout,

    #[error("mcp error: {0}")]
    Mcp(String),
}

impl ToolError {
    /// The stable wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::ToolInputInvalid,
            Self::NotFound(_) | Self::DuplicateName(_) => ErrorCode::ToolNotFound,
            Self::Timeout => ErrorCode::ToolTimeout,
            Self::McpTimeout => ErrorCode::McpTimeout,
            Self::ExecutionFailed(_) | Self::Mcp(_) => ErrorCode::ToolExecutionFailed,
        }
    }
}

/// What a tool execution produced: a JSON value for the model, or a
/// request to transfer the conversation to another agent.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    Value(Value),
    Handoff {
        target: String,
        reason: String,
        context: Option<String>,
    },
}

impl ToolOutcome {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Value(Value::String(s.into()))
    }

    pub fn json(v: Value) -> Self {
        Self::Value(v)
    }

    pub fn is_handoff(&self) -> bool {
        matches!(self, Self::Handoff { .. })
    }

    /// JSON encoding. Handoffs use the `__handoff` marker shape so logs
    /// and acknowledgement messages stay readable by dynamic consumers.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Handoff {
                target,
                reason,
                context,
            } => {
                let mut obj = serde_json::json!({
                    "__handoff": true,
                    "targetAgent": target,
                    "reason": reason,
                });
                if let Some(ctx) = context {
                    obj["context"] = Value::String(ctx.clone());
                }
                obj
            }
        }
    }
}

/// The Tool trait — implement this to give an agent a capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name within an agent's effective set.
    fn name(&self) -> &str;

    /// Human-readable description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Whether invocations must pass the human approval gate.
    fn requires_approval(&self) -> bool {
        false
    }

    /// Whether this tool only reads state. Dispatch is sequential either
    /// way; this flag is what a future parallel dispatcher would key on.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError>;

    /// Convert to the model-facing tool definition.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Name-keyed set of tools. The per-turn effective registry is assembled
/// with `try_register`, which rejects duplicate names across the union of
/// agent tools, handoff tools, and frontend-declared tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Build a registry from a tool list, rejecting duplicate names.
    pub fn with_tools(
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    ) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.try_register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool, failing on a name collision.
    pub fn try_register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Model-facing definitions for every registered tool, name-sorted so
    /// request bodies are stable.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
