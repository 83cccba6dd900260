//! Completion tracking for top-level executions
//!
//! The tracker observes the terminal result of an execution. Whichever of
//! `on_fulfilled`, `on_rejected` or `cancel` fires first wins; the rest are
//! ignored. `await_completion` suspends until that first settlement.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal outcome of a top-level execution
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionRecord {
    Fulfilled(JsonValue),
    Rejected {
        reason: JsonValue,
        stack: Option<String>,
    },
    /// Rejected by the host through `force_stop`
    Cancelled,
}

impl CompletionRecord {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, CompletionRecord::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        !self.is_fulfilled()
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            CompletionRecord::Rejected { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

/// One-shot observer of a top-level result
///
/// Cloning shares the same slot, which is how `EngineHandle` can cancel a
/// completion that the engine's own task is awaiting.
#[derive(Clone, Debug)]
pub struct CompletionTracker {
    slot: Arc<watch::Sender<Option<CompletionRecord>>>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Record a fulfilled value. Returns false if the record was already set.
    pub fn on_fulfilled(&self, value: JsonValue) -> bool {
        self.settle(CompletionRecord::Fulfilled(value))
    }

    /// Record a rejection. Returns false if the record was already set.
    pub fn on_rejected(&self, reason: JsonValue, stack: Option<String>) -> bool {
        self.settle(CompletionRecord::Rejected { reason, stack })
    }

    /// Mark an unsettled record as cancelled so awaiters unblock
    pub fn cancel(&self) -> bool {
        self.settle(CompletionRecord::Cancelled)
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn peek(&self) -> Option<CompletionRecord> {
        self.slot.borrow().clone()
    }

    /// Wait until the record is settled and return it
    pub async fn await_completion(&self) -> CompletionRecord {
        let mut rx = self.slot.subscribe();
        let record = match rx.wait_for(Option::is_some).await {
            Ok(record) => (*record).clone().unwrap_or(CompletionRecord::Cancelled),
            // The sender lives as long as `self`, so the channel cannot close here
            Err(_) => CompletionRecord::Cancelled,
        };
        record
    }

    /// Clear the record between executions
    pub(crate) fn reset(&self) {
        self.slot.send_replace(None);
    }

    fn settle(&self, record: CompletionRecord) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(record);
            true
        })
    }
}
