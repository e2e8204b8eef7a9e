//! In-memory conversation store
//!
//! Process-wide map of conversation id to state. Conversations are
//! created on first turn and retained for the process lifetime; eviction
//! belongs to an external collaborator.

use crate::approval::ApprovalRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use switchboard_core::{ConversationId, HandoffRecord, Message};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::info;

#[derive(Default)]
pub struct ConversationStore {
    conversations: DashMap<ConversationId, Arc<Conversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        id: &ConversationId,
        default_agent: &str,
    ) -> Arc<Conversation> {
        self.conversations
            .entry(id.clone())
            .or_insert_with(|| {
                info!("conversation {} created (agent {})", id, default_agent);
                Arc::new(Conversation::new(id.clone(), default_agent))
            })
            .clone()
    }

    pub fn get(&self, id: &ConversationId) -> Option<Arc<Conversation>> {
        self.conversations.get(id).map(|c| c.clone())
    }

    pub fn list(&self) -> Vec<ConversationId> {
        self.conversations.iter().map(|e| e.key().clone()).collect()
    }

    pub fn remove(&self, id: &ConversationId) -> Option<Arc<Conversation>> {
        self.conversations.remove(id).map(|(_, c)| c)
    }
}

/// State of one conversation: the message log, handoff history, active
/// agent, and outstanding approvals. Mutated only by the orchestrator
/// while it holds the turn lock.
pub struct Conversation {
    pub id: ConversationId,
    messages: RwLock<Vec<Message>>,
    handoffs: RwLock<Vec<HandoffRecord>>,
    active_agent_id: RwLock<String>,
    approvals: ApprovalRegistry,
    turn_lock: Mutex<()>,
}

impl Conversation {
    pub fn new(id: ConversationId, active_agent: impl Into<String>) -> Self {
        Self {
            id,
            messages: RwLock::new(Vec::new()),
            handoffs: RwLock::new(Vec::new()),
            active_agent_id: RwLock::new(active_agent.into()),
            approvals: ApprovalRegistry::new(),
            turn_lock: Mutex::new(()),
        }
    }

    /// Acquire the per-conversation turn lock without waiting. `None`
    /// means another turn is in flight.
    pub fn try_begin_turn(&self) -> Option<MutexGuard<'_, ()>> {
        self.turn_lock.try_lock().ok()
    }

    pub async fn append_message(&self, message: Message) {
        self.messages.write().await.push(message);
    }

    /// Replace the message carrying `tool_call_id` with an updated copy.
    /// Messages are immutable once appended; embedded tool-call entries
    /// change only through this replacement.
    pub async fn replace_tool_call(
        &self,
        tool_call_id: &str,
        update: impl FnOnce(&mut switchboard_core::ToolCall),
    ) {
        let mut messages = self.messages.write().await;
        for message in messages.iter_mut().rev() {
            let Some(calls) = &message.tool_calls else {
                continue;
            };
            if calls.iter().any(|c| c.id == tool_call_id) {
                let mut replacement = message.clone();
                if let Some(calls) = &mut replacement.tool_calls {
                    if let Some(call) = calls.iter_mut().find(|c| c.id == tool_call_id) {
                        update(call);
                    }
                }
                *message = replacement;
                return;
            }
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn active_agent(&self) -> String {
        self.active_agent_id.read().await.clone()
    }

    pub async fn set_active_agent(&self, agent_id: &str) {
        *self.active_agent_id.write().await = agent_id.to_string();
    }

    pub async fn record_handoff(&self, record: HandoffRecord) {
        self.handoffs.write().await.push(record);
    }

    pub async fn handoffs(&self) -> Vec<HandoffRecord> {
        self.handoffs.read().await.clone()
    }

    pub fn approvals(&self) -> &ApprovalRegistry {
        &self.approvals
    }
}
