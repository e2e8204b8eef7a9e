//! Normalized request and streaming types shared by all adapters

use serde::{Deserialize, Serialize};

/// A chat completion request, provider-agnostic. The orchestrator builds
/// one per model iteration; adapters convert it to their wire shape.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Message in the model-facing conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: ChatContent,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: ChatContent::Text(content.into()),
        }
    }

    pub fn blocks(role: impl Into<String>, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: role.into(),
            content: ChatContent::Blocks(blocks),
        }
    }
}

/// Message content - plain text or an array of blocks
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Content block types
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Tool definition handed to the model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Streaming delta normalized across providers.
///
/// `ToolCallEnd` is emitted only once the call's arguments are complete;
/// providers that deliver arguments whole (Ollama) carry them on the end
/// marker, providers that stream JSON fragments deliver them through
/// `ToolCallArgsDelta` first.
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Reasoning(String),
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallArgsDelta {
        id: String,
        arguments: String,
    },
    ToolCallEnd {
        id: String,
        args: Option<serde_json::Value>,
    },
    Done {
        stop_reason: Option<String>,
    },
}

/// Tool call reassembled from a delta stream.
#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub complete_args: Option<serde_json::Value>,
}

impl AccumulatedToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
            complete_args: None,
        }
    }

    /// Final argument object: whole args if the provider sent them,
    /// otherwise the concatenated fragment buffer. An empty buffer is a
    /// call with no arguments.
    pub fn parse_args(&self) -> Result<serde_json::Value, serde_json::Error> {
        if let Some(args) = &self.complete_args {
            return Ok(args.clone());
        }
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}
