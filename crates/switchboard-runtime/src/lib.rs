//! Switchboard Runtime — the agentic loop
//!
//! Drives one user turn through model-stream → tool-dispatch →
//! feed-back cycles, gating sensitive calls on human approval, pivoting
//! between agents on handoff, and emitting the normalized event stream.

pub mod agent;
pub mod approval;
pub mod handoff;
pub mod hooks;
pub mod runtime;
pub mod store;

pub use agent::{AgentContext, AgentDefinition, SystemPrompt};
pub use approval::{ApprovalRegistry, SubmitOutcome};
pub use handoff::{generate_handoff_tools, handoff_target, is_handoff_tool};
pub use hooks::{NoopHooks, RuntimeHooks, TurnInfo};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, ApprovalPolicy, RuntimeConfig};
pub use store::{Conversation, ConversationStore};
