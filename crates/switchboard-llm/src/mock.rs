//! Scripted provider for tests
//!
//! Each call to `stream_chat` pops the next scripted step and replays its
//! deltas. Requests are recorded so tests can assert on the message
//! history and tool specs the orchestrator produced.

use crate::provider::{ChatProvider, DeltaStream, ProviderError, ProviderResult};
use crate::types::{ChatRequest, StreamDelta};
use std::collections::VecDeque;
use std::sync::Mutex;
use switchboard_core::ProviderKind;
use tokio_util::sync::CancellationToken;

enum MockStep {
    Deltas(Vec<StreamDelta>),
    Fail(String),
}

#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one model iteration. A terminating `Done` is appended if the
    /// batch doesn't end with one.
    pub fn push_turn(&self, mut deltas: Vec<StreamDelta>) {
        if !matches!(deltas.last(), Some(StreamDelta::Done { .. })) {
            deltas.push(StreamDelta::Done {
                stop_reason: Some("end_turn".to_string()),
            });
        }
        self.script
            .lock()
            .unwrap()
            .push_back(MockStep::Deltas(deltas));
    }

    /// Queue a failed iteration (the open itself errors).
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(MockStep::Fail(message.into()));
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> ProviderResult<DeltaStream> {
        self.requests.lock().unwrap().push(request);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(MockStep::Deltas(deltas)) => {
                let items: Vec<ProviderResult<StreamDelta>> =
                    deltas.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(MockStep::Fail(message)) => Err(ProviderError::StreamError(message)),
            None => {
                // Script exhausted: end the turn cleanly
                let items: Vec<ProviderResult<StreamDelta>> = vec![Ok(StreamDelta::Done {
                    stop_reason: Some("end_turn".to_string()),
                })];
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }
}
