//! Guard layer around tool execution
//!
//! Pipeline: validate input schema → pre-call hook → execute under
//! timeout → cap result size → post-call hook. Hook failures are logged
//! and never abort the call.

use crate::context::ToolContext;
use crate::registry::{Tool, ToolError, ToolOutcome};
use serde_json::Value;
use std::time::Duration;
use switchboard_core::retry::with_timeout;
use switchboard_core::{Error, ErrorCode};
use tracing::{debug, warn};

pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Best-effort observation hooks around tool execution.
#[async_trait::async_trait]
pub trait ToolHooks: Send + Sync {
    async fn on_tool_call(&self, _name: &str, _args: &Value) -> HookResult {
        Ok(())
    }

    async fn on_tool_result(&self, _name: &str, _result: &Value) -> HookResult {
        Ok(())
    }
}

pub struct NoopToolHooks;

#[async_trait::async_trait]
impl ToolHooks for NoopToolHooks {}

#[derive(Clone, Debug)]
pub struct GuardConfig {
    pub tool_timeout: Duration,
    pub max_result_bytes: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            max_result_bytes: 50_000,
        }
    }
}

/// Validate `args` against the tool's declared input schema.
///
/// A schema that itself fails to compile is logged and skipped: the tool
/// author's bug shouldn't strand every call.
pub fn validate_input(tool: &dyn Tool, args: &Value) -> Result<(), ToolError> {
    let schema = tool.input_schema();
    let compiled = match jsonschema::JSONSchema::compile(&schema) {
        Ok(c) => c,
        Err(e) => {
            warn!("tool '{}' has an invalid input schema: {}", tool.name(), e);
            return Ok(());
        }
    };

    if let Err(errors) = compiled.validate(args) {
        let detail = errors
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ToolError::InvalidInput(detail));
    }
    Ok(())
}

/// Run one tool call through the full guard pipeline.
pub async fn execute_with_guards(
    tool: &dyn Tool,
    args: Value,
    ctx: &ToolContext,
    config: &GuardConfig,
    hooks: &dyn ToolHooks,
) -> Result<ToolOutcome, ToolError> {
    validate_input(tool, &args)?;

    if let Err(e) = hooks.on_tool_call(tool.name(), &args).await {
        warn!("on_tool_call hook failed for '{}': {}", tool.name(), e);
    }

    debug!("executing tool '{}'", tool.name());
    let outcome = match with_timeout(
        tool.execute(args, ctx),
        config.tool_timeout,
        "tool execution timed out",
        ErrorCode::ToolTimeout,
    )
    .await
    {
        Ok(result) => result?,
        Err(Error::Timeout { .. }) => return Err(ToolError::Timeout),
        Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
    };

    let outcome = cap_result_size(tool.name(), outcome, config.max_result_bytes);

    if let ToolOutcome::Value(result) = &outcome {
        if let Err(e) = hooks.on_tool_result(tool.name(), result).await {
            warn!("on_tool_result hook failed for '{}': {}", tool.name(), e);
        }
    }

    Ok(outcome)
}

/// Replace oversized results with a `{truncated, size}` stub so one tool
/// can't blow up the conversation log or the model context.
fn cap_result_size(name: &str, outcome: ToolOutcome, max_bytes: usize) -> ToolOutcome {
    let ToolOutcome::Value(value) = &outcome else {
        return outcome;
    };
    let size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    if size <= max_bytes {
        return outcome;
    }
    warn!(
        "tool '{}' result is {} bytes (cap {}), truncating",
        name, size, max_bytes
    );
    ToolOutcome::Value(serde_json::json!({
        "truncated": true,
        "size": size,
    }))
}
