//! Switchboard LLM - provider stream adapters
//!
//! One adapter per backend (Anthropic, OpenAI-compatible, Ollama), all
//! normalizing to the same `StreamDelta` sequence. Adapters are the only
//! place provider protocol shapes are known.

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{provider_for, ChatProvider, DeltaStream, ProviderError, ProviderResult};
pub use types::{
    AccumulatedToolCall, ChatContent, ChatMessage, ChatRequest, ContentBlock, StreamDelta, ToolSpec,
};
