//! Tests for switchboard-tools: registry, guard pipeline, MCP and frontend tools

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{ErrorCode, FrontendToolDecl};
use switchboard_tools::*;

fn ctx() -> ToolContext {
    ToolContext::new("conv-1", "agent-a")
}

// ===========================================================================
// Fixtures
// ===========================================================================

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Value(args["text"].clone()))
    }
}

struct SlowTool;

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps forever"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ToolOutcome::text("never"))
    }
}

struct BigTool;

#[async_trait::async_trait]
impl Tool for BigTool {
    fn name(&self) -> &str {
        "big"
    }

    fn description(&self) -> &str {
        "Returns a large payload"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::text("x".repeat(100_000)))
    }
}

// ===========================================================================
// ToolRegistry
// ===========================================================================

#[test]
fn registry_rejects_duplicate_names() {
    let result = ToolRegistry::with_tools(vec![
        Arc::new(EchoTool) as Arc<dyn Tool>,
        Arc::new(EchoTool) as Arc<dyn Tool>,
    ]);
    match result {
        Err(ToolError::DuplicateName(name)) => assert_eq!(name, "echo"),
        _ => panic!("expected duplicate name error"),
    }
}

#[test]
fn registry_lookup_and_specs() {
    let registry = ToolRegistry::with_tools(vec![
        Arc::new(SlowTool) as Arc<dyn Tool>,
        Arc::new(EchoTool) as Arc<dyn Tool>,
    ])
    .unwrap();

    assert_eq!(registry.len(), 2);
    assert!(registry.contains("echo"));
    assert!(registry.get("missing").is_none());

    // Specs are name-sorted for stable request bodies
    let specs = registry.specs();
    assert_eq!(specs[0].name, "echo");
    assert_eq!(specs[1].name, "slow");
    assert_eq!(specs[0].description, "Echo the input text");
}

// ===========================================================================
// ToolOutcome
// ===========================================================================

#[test]
fn outcome_handoff_wire_marker() {
    let outcome = ToolOutcome::Handoff {
        target: "billing".into(),
        reason: "needs billing".into(),
        context: Some("order 7".into()),
    };
    assert!(outcome.is_handoff());
    let wire = outcome.to_wire();
    assert_eq!(wire["__handoff"], true);
    assert_eq!(wire["targetAgent"], "billing");
    assert_eq!(wire["reason"], "needs billing");
    assert_eq!(wire["context"], "order 7");
}

#[test]
fn outcome_value_wire_is_plain() {
    let wire = ToolOutcome::text("hi").to_wire();
    assert_eq!(wire, json!("hi"));
}

// ===========================================================================
// Guard pipeline
// ===========================================================================

#[tokio::test]
async fn guards_pass_valid_input_through() {
    let outcome = execute_with_guards(
        &EchoTool,
        json!({"text": "x"}),
        &ctx(),
        &GuardConfig::default(),
        &NoopToolHooks,
    )
    .await
    .unwrap();
    assert_eq!(outcome, ToolOutcome::Value(json!("x")));
}

#[tokio::test]
async fn guards_reject_invalid_input_without_executing() {
    // missing required "text"
    let result = execute_with_guards(
        &EchoTool,
        json!({}),
        &ctx(),
        &GuardConfig::default(),
        &NoopToolHooks,
    )
    .await;
    match result {
        Err(e @ ToolError::InvalidInput(_)) => {
            assert_eq!(e.code(), ErrorCode::ToolInputInvalid)
        }
        other => panic!("expected invalid input, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn guards_time_out_slow_tools() {
    let config = GuardConfig {
        tool_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let result = execute_with_guards(&SlowTool, json!({}), &ctx(), &config, &NoopToolHooks).await;
    match result {
        Err(e @ ToolError::Timeout) => assert_eq!(e.code(), ErrorCode::ToolTimeout),
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn guards_truncate_oversize_results() {
    let config = GuardConfig {
        max_result_bytes: 1_000,
        ..Default::default()
    };
    let outcome = execute_with_guards(&BigTool, json!({}), &ctx(), &config, &NoopToolHooks)
        .await
        .unwrap();
    match outcome {
        ToolOutcome::Value(v) => {
            assert_eq!(v["truncated"], true);
            assert!(v["size"].as_u64().unwrap() > 1_000);
        }
        other => panic!("expected value, got {:?}", other),
    }
}

struct CountingHooks {
    calls: AtomicUsize,
    results: AtomicUsize,
    fail: AtomicBool,
}

impl CountingHooks {
    fn new(fail: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            results: AtomicUsize::new(0),
            fail: AtomicBool::new(fail),
        }
    }
}

#[async_trait::async_trait]
impl ToolHooks for CountingHooks {
    async fn on_tool_call(
        &self,
        _name: &str,
        _args: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("hook exploded".into());
        }
        Ok(())
    }

    async fn on_tool_result(
        &self,
        _name: &str,
        _result: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.results.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn guards_fire_hooks_around_execution() {
    let hooks = CountingHooks::new(false);
    let _ = execute_with_guards(
        &EchoTool,
        json!({"text": "x"}),
        &ctx(),
        &GuardConfig::default(),
        &hooks,
    )
    .await
    .unwrap();
    assert_eq!(hooks.calls.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.results.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn guards_survive_failing_hooks() {
    let hooks = CountingHooks::new(true);
    let outcome = execute_with_guards(
        &EchoTool,
        json!({"text": "x"}),
        &ctx(),
        &GuardConfig::default(),
        &hooks,
    )
    .await
    .unwrap();
    assert_eq!(outcome, ToolOutcome::Value(json!("x")));
}

// ===========================================================================
// MCP tools
// ===========================================================================

struct InMemoryMcp {
    connected: AtomicBool,
    slow: bool,
}

impl InMemoryMcp {
    fn new(slow: bool) -> Self {
        Self {
            connected: AtomicBool::new(false),
            slow,
        }
    }
}

#[async_trait::async_trait]
impl McpClient for InMemoryMcp {
    async fn connect(&self) -> Result<(), ToolError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, ToolError> {
        Ok(vec![McpToolInfo {
            name: "remote_add".into(),
            description: "Add two numbers".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }),
        }])
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        if self.slow {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        match name {
            "remote_add" => {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }

    async fn disconnect(&self) -> Result<(), ToolError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn mcp_tools_mount_and_delegate() {
    let client = Arc::new(InMemoryMcp::new(false));
    let tools = mount_mcp_tools("calc", client.clone()).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert!(client.is_connected());

    let tool = &tools[0];
    assert_eq!(tool.name(), "remote_add");
    let outcome = tool
        .execute(json!({"a": 2, "b": 3}), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, ToolOutcome::Value(json!(5.0)));
}

#[tokio::test]
async fn mcp_call_timeout_classifies_as_mcp_timeout() {
    let client = Arc::new(InMemoryMcp::new(true));
    client.connect().await.unwrap();
    let tool = McpTool::new(
        "calc",
        McpToolInfo {
            name: "remote_add".into(),
            description: "Add".into(),
            input_schema: json!({"type": "object"}),
        },
        client,
    )
    .with_call_timeout(Duration::from_millis(20));

    let result = tool.execute(json!({"a": 1, "b": 1}), &ctx()).await;
    match result {
        Err(e @ ToolError::McpTimeout) => assert_eq!(e.code(), ErrorCode::McpTimeout),
        other => panic!("expected mcp timeout, got {:?}", other.map(|_| ())),
    }
}

// ===========================================================================
// Frontend tools
// ===========================================================================

struct UpperDelegate;

#[async_trait::async_trait]
impl FrontendDelegate for UpperDelegate {
    async fn call(
        &self,
        _ctx: &ToolContext,
        _name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let text = args["text"].as_str().unwrap_or_default();
        Ok(json!(text.to_uppercase()))
    }
}

fn decl() -> FrontendToolDecl {
    FrontendToolDecl {
        name: "shout".into(),
        description: "Uppercase on the frontend".into(),
        input_schema: json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }),
    }
}

#[tokio::test]
async fn frontend_tool_routes_through_delegate() {
    let tool = FrontendTool::new(decl(), Some(Arc::new(UpperDelegate)));
    let outcome = tool.execute(json!({"text": "hi"}), &ctx()).await.unwrap();
    assert_eq!(outcome, ToolOutcome::Value(json!("HI")));
}

#[tokio::test]
async fn frontend_tool_without_delegate_fails() {
    let tool = FrontendTool::new(decl(), None);
    let result = tool.execute(json!({"text": "hi"}), &ctx()).await;
    assert!(matches!(result, Err(ToolError::ExecutionFailed(_))));
}
