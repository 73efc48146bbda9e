//! Pending decision table.
//!
//! Each outstanding engine decision point is parked here as a
//! [`PendingRequest`] holding the `oneshot` sender the engine is waiting on.
//! Removing an entry is the only way to resolve it, so every request
//! resolves at most once; resolving an id that is no longer present is a
//! no-op by construction. Entries carry the invocation generation that
//! raised them so an ending invocation can take back its own leftovers.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::engine::Decision;

/// One outstanding decision point.
#[derive(Debug)]
pub struct PendingRequest {
    /// Tool input as proposed by the engine; the default for "allow".
    pub original_input: Value,
    /// Invocation that raised the request.
    pub generation: u64,
    /// Continuation the engine is blocked on.
    responder: oneshot::Sender<Decision>,
}

impl PendingRequest {
    /// Park a decision point.
    #[must_use]
    pub fn new(
        original_input: Value,
        generation: u64,
        responder: oneshot::Sender<Decision>,
    ) -> Self {
        Self {
            original_input,
            generation,
            responder,
        }
    }

    /// Deliver `decision` to the waiting engine.
    ///
    /// Returns `false` if the engine stopped waiting in the meantime.
    pub fn resolve(self, request_id: &str, decision: Decision) -> bool {
        if self.responder.send(decision).is_err() {
            debug!(request_id, "decision receiver already dropped");
            return false;
        }
        true
    }
}

/// Request id → pending request, with monotonic id generation.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
    issued: u64,
}

impl PendingTable {
    /// Allocate the next request id (`req-1`, `req-2`, ...).
    pub fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("req-{}", self.issued)
    }

    /// Park `request` under `request_id`.
    pub fn insert(&mut self, request_id: String, request: PendingRequest) {
        self.entries.insert(request_id, request);
    }

    /// Take the entry for `request_id`, if still pending.
    pub fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.entries.remove(request_id)
    }

    /// Take every entry, leaving the table empty.
    pub fn drain(&mut self) -> Vec<(String, PendingRequest)> {
        self.entries.drain().collect()
    }

    /// Take every entry raised by invocation `generation`.
    pub fn drain_generation(&mut self, generation: u64) -> Vec<(String, PendingRequest)> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, request)| request.generation == generation)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|request| (id, request)))
            .collect()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requests are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
