//! ChatProvider trait and provider errors

use crate::anthropic::AnthropicProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::types::{ChatRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use switchboard_core::retry::{is_transient_message, is_transient_status, RetryOptions};
use switchboard_core::{ModelConfig, ProviderKind};
use tokio_util::sync::CancellationToken;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Core(#[from] switchboard_core::Error),
}

impl ProviderError {
    /// Infrastructure-retry classification: HTTP 408/429/5xx, connection
    /// failures, and errors whose text marks them transient. Auth and
    /// protocol errors fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => is_transient_status(*status),
            Self::RateLimited { .. } => true,
            Self::Network(e) => {
                e.is_timeout() || e.is_connect() || is_transient_message(&e.to_string())
            }
            Self::StreamError(message) => is_transient_message(message),
            Self::AuthFailed(_)
            | Self::InvalidResponse(_)
            | Self::Cancelled
            | Self::Core(_) => false,
        }
    }
}

/// Stream of normalized deltas from a provider.
pub type DeltaStream = Pin<Box<dyn Stream<Item = ProviderResult<StreamDelta>> + Send>>;

/// One streaming chat backend.
///
/// `stream_chat` opens the request under the adapter's infrastructure
/// retry policy; once the stream is yielded, mid-stream failures are not
/// retried. Triggering `cancel` drops the connection and the stream
/// yields `ProviderError::Cancelled`.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<DeltaStream>;
}

/// Build the adapter matching a model config.
pub fn provider_for(config: &ModelConfig, retry: RetryOptions) -> Arc<dyn ChatProvider> {
    match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(config, retry)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(config, retry)),
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_config(config, retry)),
    }
}
