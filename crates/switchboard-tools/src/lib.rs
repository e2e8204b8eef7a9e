//! Switchboard Tools — tool trait, registry, and the guard layer
//!
//! A tool is anything the model can invoke: a local function, an
//! MCP-backed remote tool, a frontend-delegated tool, or a synthetic
//! handoff tool. The registry assembles the per-turn effective set; the
//! guard layer validates inputs, enforces timeouts, and caps result size.

pub mod context;
pub mod frontend;
pub mod guards;
pub mod mcp;
pub mod registry;

pub use context::ToolContext;
pub use frontend::{FrontendDelegate, FrontendTool};
pub use guards::{execute_with_guards, GuardConfig, HookResult, NoopToolHooks, ToolHooks};
pub use mcp::{mount_mcp_tools, McpClient, McpTool, McpToolInfo};
pub use registry::{Tool, ToolError, ToolOutcome, ToolRegistry};
