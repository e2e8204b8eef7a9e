//! OpenAI-compatible chat completions adapter with SSE streaming
//!
//! Tool-call arguments arrive as JSON string fragments keyed by index;
//! the reassembly buffer lives here and `ToolCallEnd` fires only when the
//! stream finishes a step. Ids are forwarded verbatim when the server
//! sends them and minted otherwise.

use crate::provider::{ChatProvider, DeltaStream, ProviderError, ProviderResult};
use crate::types::{ChatContent, ChatRequest, ContentBlock, StreamDelta};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use switchboard_core::retry::{retry_with_backoff, RetryOptions};
use switchboard_core::{ApiKey, ModelConfig, ProviderKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    api_key: Option<ApiKey>,
    base_url: String,
    retry: RetryOptions,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            client: Client::new(),
            api_key: Some(api_key.into()),
            base_url: OPENAI_API_URL.to_string(),
            retry: RetryOptions::default(),
        }
    }

    pub fn from_config(config: &ModelConfig, retry: RetryOptions) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API_URL.to_string()),
            retry,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn open_stream(
        &self,
        body: &OpenAiRequest,
        api_key: Option<&str>,
    ) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(body);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenAI error {}: {}", status, error_text);

            return Err(match status.as_u16() {
                401 => ProviderError::AuthFailed(error_text),
                429 => ProviderError::RateLimited {
                    retry_after_ms: 60_000,
                },
                code => ProviderError::Http {
                    status: code,
                    message: error_text,
                },
            });
        }
        Ok(response)
    }
}

/// Flatten normalized messages into the chat-completions shape: tool_use
/// blocks become assistant `tool_calls`, tool_result blocks become
/// separate `role: "tool"` messages.
fn build_messages(request: &ChatRequest) -> Vec<OpenAiMessage> {
    let mut out = Vec::new();
    if let Some(system) = &request.system {
        out.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(system.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in &request.messages {
        match &message.content {
            ChatContent::Text(text) => out.push(OpenAiMessage {
                role: message.role.clone(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            ChatContent::Blocks(blocks) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => {
                            tool_calls.push(OpenAiToolCall {
                                id: id.clone(),
                                call_type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: name.clone(),
                                    arguments: input.to_string(),
                                },
                            });
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => out.push(OpenAiMessage {
                            role: "tool".to_string(),
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        }),
                    }
                }
                if !text.is_empty() || !tool_calls.is_empty() {
                    out.push(OpenAiMessage {
                        role: message.role.clone(),
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                    });
                }
            }
        }
    }
    out
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<DeltaStream> {
        let api_key = match &self.api_key {
            Some(key) => Some(key.resolve().await?),
            None => None,
        };

        let body = OpenAiRequest {
            model: request.model.clone(),
            messages: build_messages(&request),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| OpenAiToolSpec {
                            spec_type: "function".to_string(),
                            function: OpenAiFunctionSpec {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.input_schema.clone(),
                            },
                        })
                        .collect(),
                )
            },
        };

        debug!("OpenAI request: model={}", body.model);

        let response = retry_with_backoff(&self.retry, ProviderError::is_transient, |_| {
            self.open_stream(&body, api_key.as_deref())
        })
        .await?;

        let stream = parse_sse_stream(response.bytes_stream(), cancel);
        Ok(Box::pin(stream))
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    started: bool,
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = ProviderResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut pending: BTreeMap<usize, PartialToolCall> = BTreeMap::new();
        let mut finish_reason: Option<String> = None;
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

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };

                if data.trim() == "[DONE]" {
                    for delta in flush_tool_calls(&mut pending) {
                        yield Ok(delta);
                    }
                    yield Ok(StreamDelta::Done {
                        stop_reason: finish_reason.take().or_else(|| Some("stop".to_string())),
                    });
                    done_sent = true;
                    break 'outer;
                }

                let chunk: StreamChunk = match serde_json::from_str(data) {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ProviderError::InvalidResponse(format!(
                            "bad stream chunk: {}", e
                        )));
                        continue;
                    }
                };

                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if let Some(reason) = choice.finish_reason {
                    finish_reason = Some(reason);
                }

                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield Ok(StreamDelta::Text(text));
                    }
                }

                if let Some(reasoning) = choice.delta.reasoning_content {
                    if !reasoning.is_empty() {
                        yield Ok(StreamDelta::Reasoning(reasoning));
                    }
                }

                for fragment in choice.delta.tool_calls.unwrap_or_default() {
                    let index = fragment.index.unwrap_or(0);
                    let slot = pending.entry(index).or_default();

                    if let Some(id) = fragment.id {
                        slot.id.get_or_insert(id);
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            slot.name.get_or_insert(name);
                        }
                        if let Some(args) = function.arguments {
                            slot.arguments.push_str(&args);
                        }
                    }

                    if !slot.started {
                        if let Some(name) = slot.name.clone() {
                            let id = slot
                                .id
                                .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                                .clone();
                            slot.started = true;
                            yield Ok(StreamDelta::ToolCallStart { id, name });
                        }
                    }
                    if slot.started {
                        // Re-emit buffered fragments only after the start marker
                        let args = std::mem::take(&mut slot.arguments);
                        if !args.is_empty() {
                            let id = slot.id.clone().unwrap_or_default();
                            yield Ok(StreamDelta::ToolCallArgsDelta { id, arguments: args });
                        }
                    }
                }
            }
        }

        if !done_sent {
            for delta in flush_tool_calls(&mut pending) {
                yield Ok(delta);
            }
            yield Ok(StreamDelta::Done {
                stop_reason: finish_reason.take(),
            });
        }
    }
}

fn flush_tool_calls(pending: &mut BTreeMap<usize, PartialToolCall>) -> Vec<StreamDelta> {
    let mut out = Vec::new();
    for (_, slot) in std::mem::take(pending) {
        if slot.started {
            out.push(StreamDelta::ToolCallEnd {
                id: slot.id.unwrap_or_default(),
                args: None,
            });
        }
    }
    out
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiToolSpec>>,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiToolSpec {
    #[serde(rename = "type")]
    spec_type: String,
    function: OpenAiFunctionSpec,
}

#[derive(Serialize)]
struct OpenAiFunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: ChoiceDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChoiceDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ToolSpec};
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
        let stream = parse_sse_stream(fixture_stream(lines), CancellationToken::new());
        tokio::pin!(stream);
        let mut out = Vec::new();
        use futures::StreamExt;
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn parses_text_deltas() {
        let deltas = collect(vec![
            r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
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
    async fn reassembles_indexed_tool_call_fragments() {
        let deltas = collect(vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"echo","arguments":""}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"text\":"}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ])
        .await;

        let mut started = None;
        let mut args = String::new();
        let mut ended = false;
        let mut stop = None;
        for delta in deltas {
            match delta.unwrap() {
                StreamDelta::ToolCallStart { id, name } => started = Some((id, name)),
                StreamDelta::ToolCallArgsDelta { arguments, .. } => args.push_str(&arguments),
                StreamDelta::ToolCallEnd { id, args } => {
                    assert_eq!(id, "call_1");
                    assert!(args.is_none());
                    ended = true;
                }
                StreamDelta::Done { stop_reason } => stop = stop_reason,
                other => panic!("unexpected delta: {:?}", other),
            }
        }
        let (id, name) = started.expect("no tool call start");
        assert_eq!(id, "call_1"); // forwarded verbatim, not minted
        assert_eq!(name, "echo");
        assert!(ended);
        assert_eq!(stop.as_deref(), Some("tool_calls"));
        let parsed: serde_json::Value = serde_json::from_str(&args).unwrap();
        assert_eq!(parsed["text"], "x");
    }

    #[tokio::test]
    async fn mints_id_when_server_omits_one() {
        let deltas = collect(vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"echo","arguments":"{}"}}]},"finish_reason":null}]}"#,
            "data: [DONE]",
        ])
        .await;
        let started = deltas.iter().find_map(|d| match d {
            Ok(StreamDelta::ToolCallStart { id, .. }) => Some(id.clone()),
            _ => None,
        });
        let id = started.expect("no tool call start");
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn ends_stream_without_done_marker() {
        // Server closed the connection without [DONE]
        let deltas = collect(vec![
            r#"data: {"choices":[{"delta":{"content":"hi"},"finish_reason":"stop"}]}"#,
        ])
        .await;
        assert!(matches!(
            deltas.last().unwrap().as_ref().unwrap(),
            StreamDelta::Done { stop_reason } if stop_reason.as_deref() == Some("stop")
        ));
    }

    #[test]
    fn builds_system_tool_use_and_result_messages() {
        let request = ChatRequest {
            model: "gpt-4o".into(),
            system: Some("be brief".into()),
            messages: vec![
                ChatMessage::text("user", "hi"),
                ChatMessage::blocks(
                    "assistant",
                    vec![
                        ContentBlock::Text {
                            text: "calling".into(),
                        },
                        ContentBlock::ToolUse {
                            id: "call_1".into(),
                            name: "echo".into(),
                            input: serde_json::json!({"text": "x"}),
                        },
                    ],
                ),
                ChatMessage::blocks(
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: "call_1".into(),
                        content: "x".into(),
                        is_error: None,
                    }],
                ),
            ],
            tools: vec![ToolSpec {
                name: "echo".into(),
                description: "Echo".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            max_tokens: None,
            temperature: None,
        };

        let messages = build_messages(&request);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        let calls = messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.arguments, r#"{"text":"x"}"#);
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
    }
}
