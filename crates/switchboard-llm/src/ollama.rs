//! Ollama /api/chat adapter with NDJSON streaming
//!
//! Ollama delivers tool calls as complete objects with no ids; the
//! adapter mints fresh UUIDs and carries the whole argument object on
//! the end marker.

use crate::provider::{ChatProvider, DeltaStream, ProviderError, ProviderResult};
use crate::types::{ChatContent, ChatRequest, ContentBlock, StreamDelta};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use switchboard_core::retry::{retry_with_backoff, RetryOptions};
use switchboard_core::{ModelConfig, ProviderKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const OLLAMA_API_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    retry: RetryOptions,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: OLLAMA_API_URL.to_string(),
            retry: RetryOptions::default(),
        }
    }

    pub fn from_config(config: &ModelConfig, retry: RetryOptions) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_API_URL.to_string()),
            retry,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn open_stream(&self, body: &OllamaRequest) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama error {}: {}", status, error_text);
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: error_text,
            });
        }
        Ok(response)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten normalized messages into Ollama's chat shape. Tool results
/// become `role: "tool"` messages; tool_use blocks are replayed as
/// assistant tool_calls so the model sees its own prior calls.
fn build_messages(request: &ChatRequest) -> Vec<OllamaMessage> {
    let mut out = Vec::new();
    if let Some(system) = &request.system {
        out.push(OllamaMessage {
            role: "system".to_string(),
            content: system.clone(),
            tool_calls: None,
        });
    }

    for message in &request.messages {
        match &message.content {
            ChatContent::Text(text) => out.push(OllamaMessage {
                role: message.role.clone(),
                content: text.clone(),
                tool_calls: None,
            }),
            ChatContent::Blocks(blocks) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { name, input, .. } => {
                            tool_calls.push(OllamaToolCall {
                                function: OllamaFunctionCall {
                                    name: name.clone(),
                                    arguments: input.clone(),
                                },
                            });
                        }
                        ContentBlock::ToolResult { content, .. } => out.push(OllamaMessage {
                            role: "tool".to_string(),
                            content: content.clone(),
                            tool_calls: None,
                        }),
                    }
                }
                if !text.is_empty() || !tool_calls.is_empty() {
                    out.push(OllamaMessage {
                        role: message.role.clone(),
                        content: text,
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                    });
                }
            }
        }
    }
    out
}

#[async_trait::async_trait]
impl ChatProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<DeltaStream> {
        let body = OllamaRequest {
            model: request.model.clone(),
            messages: build_messages(&request),
            stream: true,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| OllamaToolSpec {
                            spec_type: "function".to_string(),
                            function: OllamaFunctionSpec {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.input_schema.clone(),
                            },
                        })
                        .collect(),
                )
            },
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!("Ollama request: model={}", body.model);

        let response = retry_with_backoff(&self.retry, ProviderError::is_transient, |_| {
            self.open_stream(&body)
        })
        .await?;

        let stream = parse_ndjson_stream(response.bytes_stream(), cancel);
        Ok(Box::pin(stream))
    }
}

fn parse_ndjson_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = ProviderResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut done_sent = false;

        tokio::pin!(bytes_stream);

        'outer: loop {
            let chunk_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(ProviderError::Cancelled);
                    return;
                }
                chunk = bytes_stream.next() => match chunk {
                    Some(c) => c,
                    None => break,
                },
            };

            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ProviderError::StreamError(e.to_string()));
                    continue;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer = buffer[newline + 1..].to_string();

                if line.is_empty() {
                    continue;
                }

                let chunk: StreamChunk = match serde_json::from_str(&line) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!("skipping unparseable Ollama chunk: {} - {}", e, line);
                        continue;
                    }
                };

                if let Some(message) = chunk.message {
                    if !message.content.is_empty() {
                        yield Ok(StreamDelta::Text(message.content));
                    }
                    if let Some(thinking) = message.thinking {
                        if !thinking.is_empty() {
                            yield Ok(StreamDelta::Reasoning(thinking));
                        }
                    }
                    for call in message.tool_calls.unwrap_or_default() {
                        let id = uuid::Uuid::new_v4().to_string();
                        yield Ok(StreamDelta::ToolCallStart {
                            id: id.clone(),
                            name: call.function.name,
                        });
                        yield Ok(StreamDelta::ToolCallEnd {
                            id,
                            args: Some(call.function.arguments),
                        });
                    }
                }

                if chunk.done {
                    yield Ok(StreamDelta::Done {
                        stop_reason: chunk.done_reason.or_else(|| Some("stop".to_string())),
                    });
                    done_sent = true;
                    break 'outer;
                }
            }
        }

        if !done_sent {
            yield Ok(StreamDelta::Done { stop_reason: None });
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaToolSpec>>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Serialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Serialize)]
struct OllamaFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Serialize)]
struct OllamaToolSpec {
    #[serde(rename = "type")]
    spec_type: String,
    function: OllamaFunctionSpec,
}

#[derive(Serialize)]
struct OllamaFunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    thinking: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use bytes::Bytes;

    fn fixture_stream(
        lines: Vec<&str>,
    ) -> impl futures::Stream<Item = Result<Bytes, reqwest::Error>> {
        futures::stream::iter(
            lines
                .into_iter()
                .map(|l| Ok(Bytes::from(format!("{}\n", l))))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(lines: Vec<&str>) -> Vec<ProviderResult<StreamDelta>> {
        let stream = parse_ndjson_stream(fixture_stream(lines), CancellationToken::new());
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn parses_ndjson_text_chunks() {
        let deltas = collect(vec![
            r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
        ])
        .await;

        let mut text = String::new();
        let mut stop = None;
        for delta in deltas {
            match delta.unwrap() {
                StreamDelta::Text(t) => text.push_str(&t),
                StreamDelta::Done { stop_reason } => stop = stop_reason,
                other => panic!("unexpected delta: {:?}", other),
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(stop.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn complete_tool_calls_get_minted_ids() {
        let deltas = collect(vec![
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"echo","arguments":{"text":"x"}}}]},"done":false}"#,
            r#"{"done":true,"done_reason":"stop"}"#,
        ])
        .await;

        let mut start_id = None;
        let mut end = None;
        for delta in deltas {
            match delta.unwrap() {
                StreamDelta::ToolCallStart { id, name } => {
                    assert_eq!(name, "echo");
                    start_id = Some(id);
                }
                StreamDelta::ToolCallEnd { id, args } => end = Some((id, args)),
                StreamDelta::Done { .. } => {}
                other => panic!("unexpected delta: {:?}", other),
            }
        }
        let start_id = start_id.expect("no start");
        let (end_id, args) = end.expect("no end");
        assert_eq!(start_id, end_id);
        assert!(!start_id.is_empty());
        assert_eq!(args.unwrap()["text"], "x");
    }

    #[tokio::test]
    async fn unparseable_lines_are_skipped() {
        let deltas = collect(vec![
            "not json at all",
            r#"{"message":{"role":"assistant","content":"ok"},"done":true}"#,
        ])
        .await;
        assert!(matches!(
            deltas[0].as_ref().unwrap(),
            StreamDelta::Text(t) if t == "ok"
        ));
    }

    #[test]
    fn builds_tool_result_as_tool_role_message() {
        let request = ChatRequest {
            model: "llama3.2".into(),
            system: Some("be brief".into()),
            messages: vec![
                ChatMessage::text("user", "hi"),
                ChatMessage::blocks(
                    "assistant",
                    vec![ContentBlock::ToolUse {
                        id: "tc-1".into(),
                        name: "echo".into(),
                        input: serde_json::json!({"text": "x"}),
                    }],
                ),
                ChatMessage::blocks(
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: "tc-1".into(),
                        content: "x".into(),
                        is_error: None,
                    }],
                ),
            ],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        };

        let messages = build_messages(&request);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[2].role, "assistant");
        assert!(messages[2].tool_calls.is_some());
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].content, "x");
    }
}
