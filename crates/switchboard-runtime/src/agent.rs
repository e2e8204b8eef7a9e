//! Agent definitions

use std::sync::Arc;
use switchboard_core::{ConversationId, ModelConfig};
use switchboard_tools::Tool;

/// Default iteration cap when an agent doesn't declare one.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Context handed to dynamic system prompts.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub conversation_id: ConversationId,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub frontend_context: Option<serde_json::Value>,
}

/// System prompt: a fixed string or a function of the agent context.
#[derive(Clone)]
pub enum SystemPrompt {
    Static(String),
    Dynamic(Arc<dyn Fn(&AgentContext) -> String + Send + Sync>),
}

impl SystemPrompt {
    pub fn resolve(&self, ctx: &AgentContext) -> String {
        match self {
            Self::Static(s) => s.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }
}

impl std::fmt::Debug for SystemPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(s) => f.debug_tuple("Static").field(s).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<String> for SystemPrompt {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

impl From<&str> for SystemPrompt {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

/// A named agent configuration. Immutable for the runtime's lifetime.
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub model: ModelConfig,
    pub system_prompt: SystemPrompt,
    pub tools: Vec<Arc<dyn Tool>>,
    /// MCP servers whose tools this agent may use. `None` allows every
    /// registered server; an empty list allows none.
    pub allowed_mcp_servers: Option<Vec<String>>,
    pub can_handoff_to: Vec<String>,
    pub max_iterations: Option<usize>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            model,
            system_prompt: SystemPrompt::Static(String::new()),
            tools: Vec::new(),
            allowed_mcp_servers: None,
            can_handoff_to: Vec::new(),
            max_iterations: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<SystemPrompt>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_handoff_to(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.can_handoff_to = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_mcp_servers(
        mut self,
        servers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_mcp_servers = Some(servers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn max_iterations_or_default(&self) -> usize {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn allows_mcp_server(&self, server: &str) -> bool {
        match &self.allowed_mcp_servers {
            None => true,
            Some(allowed) => allowed.iter().any(|s| s == server),
        }
    }
}
