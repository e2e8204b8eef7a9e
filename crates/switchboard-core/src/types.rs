//! Core data model: conversations, messages, tool calls, agents' model config

use crate::error::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Conversation identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ConversationId(Arc<str>);

impl ConversationId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for ConversationId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Tool call lifecycle state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// A tool call embedded in an assistant message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn pending(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            result: None,
            status: ToolCallStatus::Pending,
            error: None,
        }
    }
}

/// An attachment carried on a user message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: serde_json::Value,
}

/// A message in a conversation. Immutable once appended; tool-call entries
/// change only by replacing the containing message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Set on tool-role messages to correlate with the originating call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            agent_id: None,
            tool_calls: None,
            attachments: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut m = Self::base(Role::User, content);
        if !attachments.is_empty() {
            m.attachments = Some(attachments);
        }
        m
    }

    pub fn assistant(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(Role::Assistant, content);
        m.id = id.into();
        m.agent_id = Some(agent_id.into());
        m
    }

    pub fn assistant_with_tools(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut m = Self::assistant(id, agent_id, content);
        m.tool_calls = Some(tool_calls);
        m
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }
}

/// Record of one agent switch within a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    pub from: String,
    pub to: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A human decision on a gated tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
            code: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            code: Some(ErrorCode::UserRejected),
        }
    }

    pub fn denied(code: ErrorCode) -> Self {
        Self {
            approved: false,
            reason: None,
            code: Some(code),
        }
    }
}

/// A tool declared by the frontend for the duration of one turn.
/// Execution is delegated back to the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendToolDecl {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One user turn submitted to the runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frontend_tools: Vec<FrontendToolDecl>,
}

impl RuntimeInput {
    pub fn new(conversation_id: impl Into<ConversationId>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
            message: message.into(),
            context: None,
            attachments: Vec::new(),
            frontend_tools: Vec::new(),
        }
    }
}

/// LLM backend family.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => f.write_str("anthropic"),
            Self::OpenAi => f.write_str("openai"),
            Self::Ollama => f.write_str("ollama"),
        }
    }
}

/// Async producer for credentials that rotate (vault leases, STS tokens).
#[async_trait::async_trait]
pub trait ApiKeyResolver: Send + Sync {
    async fn resolve(&self) -> Result<String>;
}

/// A provider credential: a literal string or an async producer.
#[derive(Clone)]
pub enum ApiKey {
    Static(String),
    Resolver(Arc<dyn ApiKeyResolver>),
}

impl ApiKey {
    pub async fn resolve(&self) -> Result<String> {
        match self {
            Self::Static(s) => Ok(s.clone()),
            Self::Resolver(r) => r.resolve().await,
        }
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("ApiKey::Static(<redacted>)"),
            Self::Resolver(_) => f.write_str("ApiKey::Resolver(..)"),
        }
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

/// Model selection and connection parameters for one agent.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub api_key: Option<ApiKey>,
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub async fn resolve_api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(key) => key.resolve().await,
            None => Err(Error::ApiKeyUnavailable(format!(
                "no api key configured for {}",
                self.provider
            ))),
        }
    }
}
