//! MCP client interface and MCP-backed tools
//!
//! Transports (stdio, streamable HTTP) live outside the core; the runtime
//! only needs this interface to mount remote tools. An MCP-backed tool is
//! indistinguishable from a local one to the orchestrator.

use crate::context::ToolContext;
use crate::registry::{Tool, ToolError, ToolOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::retry::with_timeout;
use switchboard_core::{Error, ErrorCode};

/// A remote tool as reported by an MCP server.
#[derive(Clone, Debug)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Client for one MCP server.
#[async_trait::async_trait]
pub trait McpClient: Send + Sync {
    async fn connect(&self) -> Result<(), ToolError>;

    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, ToolError>;

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError>;

    async fn disconnect(&self) -> Result<(), ToolError>;

    fn is_connected(&self) -> bool;
}

/// A `Tool` that delegates execution to an MCP server.
pub struct McpTool {
    server: String,
    info: McpToolInfo,
    client: Arc<dyn McpClient>,
    call_timeout: Duration,
}

impl McpTool {
    pub fn new(server: impl Into<String>, info: McpToolInfo, client: Arc<dyn McpClient>) -> Self {
        Self {
            server: server.into(),
            info,
            client,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn input_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        if !self.client.is_connected() {
            self.client.connect().await?;
        }

        match with_timeout(
            self.client.call_tool(&self.info.name, args),
            self.call_timeout,
            "mcp call timed out",
            ErrorCode::McpTimeout,
        )
        .await
        {
            Ok(result) => Ok(ToolOutcome::Value(result?)),
            Err(Error::Timeout { .. }) => Err(ToolError::McpTimeout),
            Err(e) => Err(ToolError::Mcp(e.to_string())),
        }
    }
}

/// Wrap every tool a server advertises, ready for registration.
pub async fn mount_mcp_tools(
    server: impl Into<String>,
    client: Arc<dyn McpClient>,
) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
    let server = server.into();
    if !client.is_connected() {
        client.connect().await?;
    }
    let tools = client.list_tools().await?;
    Ok(tools
        .into_iter()
        .map(|info| {
            Arc::new(McpTool::new(server.clone(), info, client.clone())) as Arc<dyn Tool>
        })
        .collect())
}
