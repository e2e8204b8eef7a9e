//! Frontend-delegated tools
//!
//! A frontend can declare tools for the duration of one turn; when the
//! model calls one, execution is routed back to the transport through a
//! `FrontendDelegate`. With no delegate configured the call fails rather
//! than hanging the turn.

use crate::context::ToolContext;
use crate::registry::{Tool, ToolError, ToolOutcome};
use serde_json::Value;
use std::sync::Arc;
use switchboard_core::FrontendToolDecl;

/// Transport-side executor for frontend-declared tools.
#[async_trait::async_trait]
pub trait FrontendDelegate: Send + Sync {
    async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: Value,
    ) -> Result<Value, ToolError>;
}

/// A declared-per-turn tool backed by a frontend delegate.
pub struct FrontendTool {
    decl: FrontendToolDecl,
    delegate: Option<Arc<dyn FrontendDelegate>>,
}

impl FrontendTool {
    pub fn new(decl: FrontendToolDecl, delegate: Option<Arc<dyn FrontendDelegate>>) -> Self {
        Self { decl, delegate }
    }
}

#[async_trait::async_trait]
impl Tool for FrontendTool {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn description(&self) -> &str {
        &self.decl.description
    }

    fn input_schema(&self) -> Value {
        self.decl.input_schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        match &self.delegate {
            Some(delegate) => Ok(ToolOutcome::Value(
                delegate.call(ctx, &self.decl.name, args).await?,
            )),
            None => Err(ToolError::ExecutionFailed(format!(
                "tool '{}' is frontend-declared but no frontend delegate is configured",
                self.decl.name
            ))),
        }
    }
}
