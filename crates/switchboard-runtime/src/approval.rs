//! Approval coordinator — one-shot rendezvous per gated tool call
//!
//! The orchestrator registers a slot and suspends; the transport resolves
//! it through `submit`. Exactly one producer and one consumer per slot;
//! a second submission for the same call is a typed no-op.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use switchboard_core::ApprovalDecision;
use tokio::sync::oneshot;
use tracing::debug;

/// Result of delivering a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The waiting turn received the decision.
    Delivered,
    /// The slot was already resolved (duplicate submission).
    AlreadyResolved,
    /// No approval was ever requested for this tool call.
    UnknownToolCall,
}

struct ApprovalSlot {
    #[allow(dead_code)]
    tool_name: String,
    #[allow(dead_code)]
    args: Value,
    #[allow(dead_code)]
    agent_id: String,
    waiter: oneshot::Sender<ApprovalDecision>,
}

/// Per-conversation registry of outstanding approval requests.
#[derive(Default)]
pub struct ApprovalRegistry {
    slots: Mutex<ApprovalState>,
}

#[derive(Default)]
struct ApprovalState {
    pending: HashMap<String, ApprovalSlot>,
    resolved: HashSet<String>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for a gated call and return the waiter's receiver.
    pub fn register(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        args: Value,
        agent_id: &str,
    ) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.slots.lock().unwrap();
        state.pending.insert(
            tool_call_id.to_string(),
            ApprovalSlot {
                tool_name: tool_name.to_string(),
                args,
                agent_id: agent_id.to_string(),
                waiter: tx,
            },
        );
        rx
    }

    /// Deliver a decision to the waiting turn. Idempotent: a second call
    /// for the same id reports `AlreadyResolved`.
    pub fn submit(&self, tool_call_id: &str, decision: ApprovalDecision) -> SubmitOutcome {
        let mut state = self.slots.lock().unwrap();
        match state.pending.remove(tool_call_id) {
            Some(slot) => {
                state.resolved.insert(tool_call_id.to_string());
                // A dropped receiver means the turn already moved on
                let _ = slot.waiter.send(decision);
                SubmitOutcome::Delivered
            }
            None if state.resolved.contains(tool_call_id) => SubmitOutcome::AlreadyResolved,
            None => SubmitOutcome::UnknownToolCall,
        }
    }

    /// Remove a slot without a transport decision (timeout, turn exit).
    pub fn abandon(&self, tool_call_id: &str) {
        let mut state = self.slots.lock().unwrap();
        if state.pending.remove(tool_call_id).is_some() {
            state.resolved.insert(tool_call_id.to_string());
        }
    }

    /// Resolve every outstanding slot with the same decision. Used on
    /// conversation cancellation.
    pub fn drain(&self, decision: ApprovalDecision) {
        let mut state = self.slots.lock().unwrap();
        let pending = std::mem::take(&mut state.pending);
        for (id, slot) in pending {
            debug!("draining approval slot {}", id);
            let _ = slot.waiter.send(decision.clone());
            state.resolved.insert(id);
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.slots.lock().unwrap().pending.keys().cloned().collect()
    }
}
