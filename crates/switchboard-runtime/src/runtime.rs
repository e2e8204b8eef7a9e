//! Agent runtime — the orchestrator that drives one turn
//!
//! One turn is an unbounded sequence of model-stream → tool-dispatch →
//! feed-back cycles. The loop suspends on stream chunks, tool execution,
//! approval decisions, and retry backoff; every suspension is cancellable
//! by the conversation's token. Concurrent turns for the same
//! conversation fail fast with `CONVERSATION_BUSY`.

use crate::agent::{AgentContext, AgentDefinition};
use crate::approval::SubmitOutcome;
use crate::handoff::generate_handoff_tools;
use crate::hooks::{NoopHooks, RuntimeHooks, TurnInfo};
use crate::store::{Conversation, ConversationStore};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::retry::{with_timeout, RetryOptions};
use switchboard_core::{
    ApprovalDecision, ConversationId, Error, ErrorCode, HandoffRecord, Message, ProviderKind,
    Result, RuntimeEvent, RuntimeInput, Role, ToolCall, ToolCallStatus,
};
use switchboard_llm::{
    provider_for, AccumulatedToolCall, ChatContent, ChatMessage, ChatProvider, ChatRequest,
    ContentBlock, ProviderError, StreamDelta,
};
use switchboard_tools::{
    execute_with_guards, FrontendDelegate, FrontendTool, GuardConfig, HookResult, Tool,
    ToolContext, ToolHooks, ToolOutcome, ToolRegistry,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Global policy predicate: gate a tool call on approval even when the
/// tool itself doesn't require it.
pub type ApprovalPolicy = Arc<dyn Fn(&dyn Tool, &ToolContext) -> bool + Send + Sync>;

pub struct RuntimeConfig {
    /// Agent that owns new conversations.
    pub default_agent: String,
    /// Deadline for opening a provider stream.
    pub request_timeout: Duration,
    /// Deadline for one tool execution.
    pub tool_timeout: Duration,
    /// Deadline for a human decision; unbounded when `None`.
    pub approval_timeout: Option<Duration>,
    /// Serialized tool results above this size are replaced by a stub.
    pub max_tool_result_bytes: usize,
    /// Cap on distinct agents touched by one turn's handoff chain.
    pub max_agents_per_turn: usize,
    pub retry: RetryOptions,
    pub approval_policy: Option<ApprovalPolicy>,
}

impl RuntimeConfig {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            default_agent: default_agent.into(),
            request_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(30),
            approval_timeout: None,
            max_tool_result_bytes: 50_000,
            max_agents_per_turn: 5,
            retry: RetryOptions::default(),
            approval_policy: None,
        }
    }
}

pub struct AgentRuntimeBuilder {
    config: RuntimeConfig,
    agents: Vec<AgentDefinition>,
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
    mcp_servers: HashMap<String, Vec<Arc<dyn Tool>>>,
    frontend_delegate: Option<Arc<dyn FrontendDelegate>>,
    hooks: Arc<dyn RuntimeHooks>,
}

impl AgentRuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            agents: Vec::new(),
            providers: HashMap::new(),
            mcp_servers: HashMap::new(),
            frontend_delegate: None,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn agent(mut self, definition: AgentDefinition) -> Self {
        self.agents.push(definition);
        self
    }

    /// Inject a provider for a backend, overriding the built-in adapter.
    pub fn provider(mut self, kind: ProviderKind, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    /// Register a mounted MCP server's tools under a server name.
    pub fn mcp_server(mut self, name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.mcp_servers.insert(name.into(), tools);
        self
    }

    pub fn frontend_delegate(mut self, delegate: Arc<dyn FrontendDelegate>) -> Self {
        self.frontend_delegate = Some(delegate);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn RuntimeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the configuration and assemble the runtime.
    ///
    /// Surfaces duplicate tool names within any agent's effective set
    /// (declared ∪ handoff ∪ allowed MCP tools) and a missing default
    /// agent as startup errors.
    pub fn build(mut self) -> Result<AgentRuntime> {
        let agents: HashMap<String, Arc<AgentDefinition>> = self
            .agents
            .drain(..)
            .map(|a| (a.id.clone(), Arc::new(a)))
            .collect();

        if !agents.contains_key(&self.config.default_agent) {
            return Err(Error::UnknownAgent(self.config.default_agent.clone()));
        }

        for agent in agents.values() {
            self.providers
                .entry(agent.model.provider)
                .or_insert_with(|| provider_for(&agent.model, self.config.retry.clone()));

            let mut seen = ToolRegistry::new();
            for tool in &agent.tools {
                seen.try_register(tool.clone())
                    .map_err(|_| Error::DuplicateTool(tool.name().to_string()))?;
            }
            for tool in generate_handoff_tools(agent, &agents) {
                let name = tool.name().to_string();
                seen.try_register(tool)
                    .map_err(|_| Error::DuplicateTool(name))?;
            }
            for (server, tools) in &self.mcp_servers {
                if !agent.allows_mcp_server(server) {
                    continue;
                }
                for tool in tools {
                    seen.try_register(tool.clone())
                        .map_err(|_| Error::DuplicateTool(tool.name().to_string()))?;
                }
            }
        }

        Ok(AgentRuntime {
            agents,
            providers: self.providers,
            mcp_servers: self.mcp_servers,
            frontend_delegate: self.frontend_delegate,
            store: ConversationStore::new(),
            config: self.config,
            hooks: self.hooks,
        })
    }
}

pub struct AgentRuntime {
    agents: HashMap<String, Arc<AgentDefinition>>,
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
    mcp_servers: HashMap<String, Vec<Arc<dyn Tool>>>,
    frontend_delegate: Option<Arc<dyn FrontendDelegate>>,
    store: ConversationStore,
    config: RuntimeConfig,
    hooks: Arc<dyn RuntimeHooks>,
}

/// Terminal failure of a turn, emitted as one `error` event.
struct TurnError {
    message: String,
    code: ErrorCode,
}

impl TurnError {
    fn cancelled() -> Self {
        Self {
            message: "turn cancelled".to_string(),
            code: ErrorCode::Cancelled,
        }
    }

    fn provider(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::ProviderError,
        }
    }
}

enum Dispatch {
    Continue,
    Handoff,
}

impl AgentRuntime {
    pub fn builder(config: RuntimeConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(config)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn agents(&self) -> &HashMap<String, Arc<AgentDefinition>> {
        &self.agents
    }

    /// Deliver a human decision for a gated tool call.
    pub fn submit_approval(
        &self,
        conversation_id: &ConversationId,
        tool_call_id: &str,
        decision: ApprovalDecision,
    ) -> SubmitOutcome {
        match self.store.get(conversation_id) {
            Some(conversation) => conversation.approvals().submit(tool_call_id, decision),
            None => SubmitOutcome::UnknownToolCall,
        }
    }

    /// Run one turn, emitting events into `event_tx` until a terminal
    /// event. The pull-based variant is `turn_stream`.
    pub async fn process_turn(
        &self,
        input: RuntimeInput,
        event_tx: mpsc::Sender<RuntimeEvent>,
        cancel: CancellationToken,
    ) {
        let conversation = self
            .store
            .get_or_create(&input.conversation_id, &self.config.default_agent);

        // One turn at a time per conversation; contention fails fast
        let Some(_turn) = conversation.try_begin_turn() else {
            let _ = event_tx
                .send(RuntimeEvent::error(
                    format!(
                        "a turn is already in flight for conversation {}",
                        input.conversation_id
                    ),
                    ErrorCode::ConversationBusy,
                ))
                .await;
            return;
        };

        conversation
            .append_message(Message::user(&input.message, input.attachments.clone()))
            .await;

        let turn_info = TurnInfo {
            conversation_id: input.conversation_id.clone(),
            agent_id: conversation.active_agent().await,
            user_message: input.message.clone(),
        };
        if let Err(e) = self.hooks.on_turn_start(&turn_info).await {
            warn!("on_turn_start hook failed: {}", e);
        }

        if let Err(end) = self.drive_turn(&conversation, &input, &event_tx, &cancel).await {
            conversation
                .approvals()
                .drain(ApprovalDecision::denied(ErrorCode::Cancelled));
            let _ = event_tx.send(RuntimeEvent::error(end.message, end.code)).await;
        }

        if let Err(e) = self.hooks.on_turn_end(&turn_info).await {
            warn!("on_turn_end hook failed: {}", e);
        }

        info!(
            "turn complete: conversation={}, agent={}, messages={}",
            conversation.id,
            conversation.active_agent().await,
            conversation.message_count().await
        );
    }

    /// Run one turn as a pull-based event stream. A producer task feeds a
    /// bounded channel; consumers read until a terminal event.
    pub fn turn_stream(
        self: &Arc<Self>,
        input: RuntimeInput,
        cancel: CancellationToken,
    ) -> ReceiverStream<RuntimeEvent> {
        let (tx, rx) = mpsc::channel(256);
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            runtime.process_turn(input, tx, cancel).await;
        });
        ReceiverStream::new(rx)
    }

    /// The agentic loop. `Ok(())` means a terminal `text-complete` was
    /// already emitted; `Err` is mapped to a terminal `error` event by
    /// the caller.
    async fn drive_turn(
        &self,
        conversation: &Arc<Conversation>,
        input: &RuntimeInput,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), TurnError> {
        // Cumulative across agents: a handoff does not reset the counter
        let mut iterations = 0usize;
        let mut agents_in_turn = 1usize;

        'agent: loop {
            let agent_id = conversation.active_agent().await;
            let agent = self
                .agents
                .get(&agent_id)
                .cloned()
                .ok_or_else(|| TurnError::provider(format!("unknown agent: {}", agent_id)))?;
            let provider = self
                .providers
                .get(&agent.model.provider)
                .cloned()
                .ok_or_else(|| {
                    TurnError::provider(format!(
                        "no provider registered for {}",
                        agent.model.provider
                    ))
                })?;
            let registry = self.effective_registry(&agent, input);
            let max_iterations = agent.max_iterations_or_default();

            loop {
                if cancel.is_cancelled() {
                    return Err(TurnError::cancelled());
                }

                iterations += 1;
                if iterations > max_iterations {
                    return Err(TurnError {
                        message: format!(
                            "max iterations exceeded after {} model calls",
                            iterations - 1
                        ),
                        code: ErrorCode::MaxIterationsExceeded,
                    });
                }

                let request = self.build_request(&agent, conversation, input, &registry).await;
                debug!(
                    "iteration {}: agent={}, {} messages, {} tools",
                    iterations,
                    agent.id,
                    request.messages.len(),
                    request.tools.len()
                );

                let open = with_timeout(
                    provider.stream_chat(request, cancel.clone()),
                    self.config.request_timeout,
                    "provider request timed out",
                    ErrorCode::ProviderError,
                );
                let stream = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TurnError::cancelled()),
                    result = open => match result {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(ProviderError::Cancelled)) => return Err(TurnError::cancelled()),
                        Ok(Err(e)) => return Err(TurnError::provider(e.to_string())),
                        Err(e) => return Err(TurnError::provider(e.to_string())),
                    },
                };

                let message_id = Uuid::new_v4().to_string();
                let mut text = String::new();
                // In start order; providers may interleave several calls
                let mut calls: Vec<AccumulatedToolCall> = Vec::new();

                tokio::pin!(stream);

                loop {
                    let delta = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            if !text.is_empty() {
                                conversation
                                    .append_message(Message::assistant(&message_id, &agent.id, &text))
                                    .await;
                            }
                            return Err(TurnError::cancelled());
                        }
                        item = stream.next() => match item {
                            Some(item) => item,
                            None => break,
                        },
                    };

                    match delta {
                        Ok(StreamDelta::Text(t)) => {
                            text.push_str(&t);
                            let _ = event_tx
                                .send(RuntimeEvent::TextDelta {
                                    message_id: message_id.clone(),
                                    delta: t,
                                })
                                .await;
                        }
                        Ok(StreamDelta::Reasoning(t)) => {
                            let _ = event_tx
                                .send(RuntimeEvent::ReasoningDelta {
                                    message_id: message_id.clone(),
                                    delta: t,
                                })
                                .await;
                        }
                        Ok(StreamDelta::ToolCallStart { id, name }) => {
                            calls.push(AccumulatedToolCall::new(id, name));
                        }
                        Ok(StreamDelta::ToolCallArgsDelta { id, arguments }) => {
                            if let Some(call) =
                                calls.iter_mut().rev().find(|c| c.id == id)
                            {
                                call.arguments.push_str(&arguments);
                            }
                        }
                        Ok(StreamDelta::ToolCallEnd { id, args }) => {
                            if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                                if args.is_some() {
                                    call.complete_args = args;
                                }
                            }
                        }
                        Ok(StreamDelta::Done { .. }) => {}
                        Err(ProviderError::Cancelled) => {
                            if !text.is_empty() {
                                conversation
                                    .append_message(Message::assistant(&message_id, &agent.id, &text))
                                    .await;
                            }
                            return Err(TurnError::cancelled());
                        }
                        Err(e) => return Err(TurnError::provider(e.to_string())),
                    }
                }
                if calls.is_empty() {
                    conversation
                        .append_message(Message::assistant(&message_id, &agent.id, &text))
                        .await;
                    let _ = event_tx
                        .send(RuntimeEvent::TextComplete {
                            message_id,
                            content: text,
                        })
                        .await;
                    return Ok(());
                }

                // Record the assistant step with its pending tool calls
                let prepared: Vec<(AccumulatedToolCall, std::result::Result<Value, String>)> =
                    calls
                        .into_iter()
                        .map(|c| {
                            let parsed = c.parse_args().map_err(|e| e.to_string());
                            (c, parsed)
                        })
                        .collect();
                let entries: Vec<ToolCall> = prepared
                    .iter()
                    .map(|(c, parsed)| {
                        ToolCall::pending(
                            &c.id,
                            &c.name,
                            parsed.as_ref().cloned().unwrap_or(Value::Null),
                        )
                    })
                    .collect();
                conversation
                    .append_message(Message::assistant_with_tools(
                        &message_id,
                        &agent.id,
                        &text,
                        entries,
                    ))
                    .await;

                // Dispatch sequentially; a handoff abandons the rest of the step
                for (index, (call, parsed)) in prepared.iter().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(TurnError::cancelled());
                    }

                    let dispatch = self
                        .dispatch_call(conversation, &agent, &registry, call, parsed, input, event_tx, cancel)
                        .await?;

                    if matches!(dispatch, Dispatch::Handoff) {
                        self.skip_remaining_calls(conversation, &prepared[index + 1..])
                            .await;
                        agents_in_turn += 1;
                        if agents_in_turn > self.config.max_agents_per_turn {
                            return Err(TurnError {
                                message: format!(
                                    "handoff chain exceeded {} agents in one turn",
                                    self.config.max_agents_per_turn
                                ),
                                code: ErrorCode::MaxIterationsExceeded,
                            });
                        }
                        continue 'agent;
                    }
                }
            }
        }
    }

    /// The shared tool-dispatch sequence for one call.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_call(
        &self,
        conversation: &Arc<Conversation>,
        agent: &Arc<AgentDefinition>,
        registry: &ToolRegistry,
        call: &AccumulatedToolCall,
        parsed: &std::result::Result<Value, String>,
        input: &RuntimeInput,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Dispatch, TurnError> {
        let _ = event_tx
            .send(RuntimeEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                agent_id: agent.id.clone(),
            })
            .await;

        let args = match parsed {
            Ok(args) => args.clone(),
            Err(parse_error) => {
                let _ = event_tx
                    .send(RuntimeEvent::ToolCallArgs {
                        tool_call_id: call.id.clone(),
                        args: Value::Null,
                    })
                    .await;
                let message = format!("invalid tool arguments: {}", parse_error);
                self.fail_call(conversation, event_tx, call, ErrorCode::ToolInputInvalid, &message)
                    .await;
                return Ok(Dispatch::Continue);
            }
        };

        let _ = event_tx
            .send(RuntimeEvent::ToolCallArgs {
                tool_call_id: call.id.clone(),
                args: args.clone(),
            })
            .await;

        let Some(tool) = registry.get(&call.name) else {
            let message = format!("tool not found: {}", call.name);
            self.fail_call(conversation, event_tx, call, ErrorCode::ToolNotFound, &message)
                .await;
            return Ok(Dispatch::Continue);
        };

        let ctx = ToolContext {
            conversation_id: conversation.id.clone(),
            user_id: input.user_id.clone(),
            frontend_context: input.context.clone(),
            agent_id: agent.id.clone(),
        };

        if self.requires_approval(tool.as_ref(), &ctx) {
            let waiter = conversation
                .approvals()
                .register(&call.id, &call.name, args.clone(), &agent.id);
            let _ = event_tx
                .send(RuntimeEvent::ApprovalRequired {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: args.clone(),
                    agent_id: agent.id.clone(),
                })
                .await;

            let decision = self.wait_for_decision(conversation, &call.id, waiter, cancel).await;

            if !decision.approved {
                match decision.code {
                    Some(code @ (ErrorCode::Cancelled | ErrorCode::ApprovalTimeout)) => {
                        // The waiter itself gave up; the call and the turn
                        // both terminate with the same code
                        let message = match code {
                            ErrorCode::ApprovalTimeout => "approval wait timed out",
                            _ => "approval cancelled",
                        };
                        self.fail_call(conversation, event_tx, call, code, message).await;
                        return Err(TurnError {
                            message: message.to_string(),
                            code,
                        });
                    }
                    _ => {
                        let reason = decision
                            .reason
                            .unwrap_or_else(|| "rejected by user".to_string());
                        self.fail_call(
                            conversation,
                            event_tx,
                            call,
                            ErrorCode::UserRejected,
                            &reason,
                        )
                        .await;
                        return Ok(Dispatch::Continue);
                    }
                }
            }
        }

        conversation
            .replace_tool_call(&call.id, |c| c.status = ToolCallStatus::Running)
            .await;

        let guard_config = GuardConfig {
            tool_timeout: self.config.tool_timeout,
            max_result_bytes: self.config.max_tool_result_bytes,
        };
        let hooks = HookBridge(self.hooks.as_ref());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::cancelled()),
            result = execute_with_guards(tool.as_ref(), args, &ctx, &guard_config, &hooks) => result,
        };

        match result {
            Ok(ToolOutcome::Handoff {
                target,
                reason,
                context,
            }) => {
                let _ = event_tx
                    .send(RuntimeEvent::AgentHandoff {
                        from: agent.id.clone(),
                        to: target.clone(),
                        reason: reason.clone(),
                        context: context.clone(),
                    })
                    .await;
                conversation
                    .record_handoff(HandoffRecord {
                        from: agent.id.clone(),
                        to: target.clone(),
                        reason: reason.clone(),
                        context: context.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                conversation.set_active_agent(&target).await;
                let wire = ToolOutcome::Handoff {
                    target: target.clone(),
                    reason: reason.clone(),
                    context,
                }
                .to_wire();
                conversation
                    .replace_tool_call(&call.id, |c| {
                        c.status = ToolCallStatus::Completed;
                        c.result = Some(wire.clone());
                    })
                    .await;
                conversation
                    .append_message(Message::tool_result(
                        &call.id,
                        format!("Conversation transferred to {}: {}", target, reason),
                    ))
                    .await;
                info!(
                    "handoff: conversation={}, {} -> {}",
                    conversation.id, agent.id, target
                );
                Ok(Dispatch::Handoff)
            }
            Ok(ToolOutcome::Value(value)) => {
                let _ = event_tx
                    .send(RuntimeEvent::ToolCallResult {
                        tool_call_id: call.id.clone(),
                        result: value.clone(),
                    })
                    .await;
                conversation
                    .replace_tool_call(&call.id, |c| {
                        c.status = ToolCallStatus::Completed;
                        c.result = Some(value.clone());
                    })
                    .await;
                let content = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                conversation
                    .append_message(Message::tool_result(&call.id, content))
                    .await;
                Ok(Dispatch::Continue)
            }
            Err(error) => {
                let message = error.to_string();
                self.fail_call(conversation, event_tx, call, error.code(), &message)
                    .await;
                Ok(Dispatch::Continue)
            }
        }
    }

    /// Emit a `tool-call-error`, mark the stored entry, and feed an error
    /// string back so the model can recover within the turn.
    async fn fail_call(
        &self,
        conversation: &Arc<Conversation>,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        call: &AccumulatedToolCall,
        code: ErrorCode,
        message: &str,
    ) {
        let _ = event_tx
            .send(RuntimeEvent::ToolCallError {
                tool_call_id: call.id.clone(),
                error: message.to_string(),
                code,
            })
            .await;
        conversation
            .replace_tool_call(&call.id, |c| {
                c.status = ToolCallStatus::Error;
                c.error = Some(message.to_string());
            })
            .await;
        conversation
            .append_message(Message::tool_result(&call.id, format!("Error: {}", message)))
            .await;
    }

    /// Feed placeholder results for calls abandoned by a handoff so the
    /// provider-side history stays well-formed (every tool call answered).
    async fn skip_remaining_calls(
        &self,
        conversation: &Arc<Conversation>,
        remaining: &[(AccumulatedToolCall, std::result::Result<Value, String>)],
    ) {
        for (call, _) in remaining {
            conversation
                .replace_tool_call(&call.id, |c| {
                    c.status = ToolCallStatus::Error;
                    c.error = Some("not executed: conversation was handed off".to_string());
                })
                .await;
            conversation
                .append_message(Message::tool_result(
                    &call.id,
                    "Not executed: the conversation was handed off before this call ran.",
                ))
                .await;
        }
    }

    fn requires_approval(&self, tool: &dyn Tool, ctx: &ToolContext) -> bool {
        tool.requires_approval()
            || self
                .config
                .approval_policy
                .as_ref()
                .is_some_and(|policy| policy(tool, ctx))
    }

    /// Suspend until the transport decides, the conversation is
    /// cancelled, or the approval timeout elapses.
    async fn wait_for_decision(
        &self,
        conversation: &Arc<Conversation>,
        tool_call_id: &str,
        waiter: tokio::sync::oneshot::Receiver<ApprovalDecision>,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        match self.config.approval_timeout {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    conversation.approvals().abandon(tool_call_id);
                    ApprovalDecision::denied(ErrorCode::Cancelled)
                }
                decision = waiter => decision
                    .unwrap_or_else(|_| ApprovalDecision::denied(ErrorCode::Cancelled)),
                _ = tokio::time::sleep(limit) => {
                    conversation.approvals().abandon(tool_call_id);
                    ApprovalDecision::denied(ErrorCode::ApprovalTimeout)
                }
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    conversation.approvals().abandon(tool_call_id);
                    ApprovalDecision::denied(ErrorCode::Cancelled)
                }
                decision = waiter => decision
                    .unwrap_or_else(|_| ApprovalDecision::denied(ErrorCode::Cancelled)),
            },
        }
    }

    /// Assemble the effective tool set for one agent on one turn:
    /// declared tools ∪ handoff tools ∪ allowed MCP tools ∪
    /// frontend-declared tools. Name collisions inside the static part
    /// were rejected at build time; a colliding frontend declaration is
    /// skipped with a warning.
    fn effective_registry(&self, agent: &AgentDefinition, input: &RuntimeInput) -> ToolRegistry {
        let mut registry = ToolRegistry::new();

        for tool in &agent.tools {
            if let Err(e) = registry.try_register(tool.clone()) {
                warn!("skipping tool: {}", e);
            }
        }
        for tool in generate_handoff_tools(agent, &self.agents) {
            if let Err(e) = registry.try_register(tool) {
                warn!("skipping handoff tool: {}", e);
            }
        }
        for (server, tools) in &self.mcp_servers {
            if !agent.allows_mcp_server(server) {
                continue;
            }
            for tool in tools {
                if let Err(e) = registry.try_register(tool.clone()) {
                    warn!("skipping mcp tool: {}", e);
                }
            }
        }
        for decl in &input.frontend_tools {
            let tool = Arc::new(FrontendTool::new(
                decl.clone(),
                self.frontend_delegate.clone(),
            ));
            if let Err(e) = registry.try_register(tool) {
                warn!("skipping frontend tool: {}", e);
            }
        }

        registry
    }

    async fn build_request(
        &self,
        agent: &AgentDefinition,
        conversation: &Arc<Conversation>,
        input: &RuntimeInput,
        registry: &ToolRegistry,
    ) -> ChatRequest {
        let ctx = AgentContext {
            conversation_id: conversation.id.clone(),
            agent_id: agent.id.clone(),
            user_id: input.user_id.clone(),
            frontend_context: input.context.clone(),
        };
        let system = agent.system_prompt.resolve(&ctx);

        ChatRequest {
            model: agent.model.model.clone(),
            system: if system.is_empty() { None } else { Some(system) },
            messages: build_chat_messages(&conversation.messages().await),
            tools: registry.specs(),
            max_tokens: agent.model.max_tokens,
            temperature: agent.model.temperature,
        }
    }
}

/// Convert the stored message log into the normalized model-facing shape.
/// Consecutive tool results merge into a single user message so providers
/// that require all of a step's results together (Anthropic) stay happy.
fn build_chat_messages(history: &[Message]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::new();

    for message in history {
        match message.role {
            // System content rides on the request, never in the log
            Role::System => continue,
            Role::User => {
                let mut content = message.content.clone();
                if let Some(attachments) = &message.attachments {
                    for attachment in attachments {
                        content.push_str(&format!(
                            "\n\n[attachment {}: {}]",
                            attachment.name, attachment.data
                        ));
                    }
                }
                out.push(ChatMessage::text("user", content));
            }
            Role::Assistant => match &message.tool_calls {
                Some(calls) if !calls.is_empty() => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    for call in calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.args.clone(),
                        });
                    }
                    out.push(ChatMessage::blocks("assistant", blocks));
                }
                _ => out.push(ChatMessage::text("assistant", &message.content)),
            },
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                    is_error: None,
                };
                let appended = match out.last_mut() {
                    Some(last) if last.role == "user" => match &mut last.content {
                        ChatContent::Blocks(blocks)
                            if blocks
                                .iter()
                                .any(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                        {
                            blocks.push(block.clone());
                            true
                        }
                        _ => false,
                    },
                    _ => false,
                };
                if !appended {
                    out.push(ChatMessage::blocks("user", vec![block]));
                }
            }
        }
    }

    out
}

/// Adapts the runtime's hooks to the guard layer's narrower interface.
struct HookBridge<'a>(&'a dyn RuntimeHooks);

#[async_trait::async_trait]
impl ToolHooks for HookBridge<'_> {
    async fn on_tool_call(&self, name: &str, args: &Value) -> HookResult {
        self.0.on_tool_call(name, args).await
    }

    async fn on_tool_result(&self, name: &str, result: &Value) -> HookResult {
        self.0.on_tool_result(name, result).await
    }
}
