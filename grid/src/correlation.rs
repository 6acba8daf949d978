//! # Correlation Table
//!
//! Links an outbound request to the caller waiting for its `Answer`.
//!
//! ```text
//! Request:
//!   1. mint id, register (id -> reply sender) and arm its timeout
//!   2. transmit
//! Answer arrives:
//!   3. remove id, complete the sender with the outcome
//! Timeout fires first:
//!   3. remove id, complete the sender with GridError::Timeout
//!   4. a late Answer for the id is a correlation miss: logged and dropped
//! ```
//!
//! An entry is removed exactly once, by whichever of answer, timeout or
//! failure gets to it first.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use grid_api::errors::{FailureReason, GridError};
use grid_api::types::{GridResult, Payload};

use crate::protocol::message::CorrelationId;

/// Completion handle of a caller waiting for a result.
pub type ReplySender = oneshot::Sender<GridResult<Payload>>;
pub type ReplyReceiver = oneshot::Receiver<GridResult<Payload>>;

/// What the caller was waiting for, kept for logs.
#[derive(Debug, Clone)]
pub struct PendingContext {
    pub address: String,
    pub operation: String,
}

struct PendingReply {
    sender: ReplySender,
    context: PendingContext,
    registered_at: Instant,
}

pub struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, PendingReply>>,
    timeout: Duration,
}

impl fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CorrelationTable {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingReply>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_id() -> CorrelationId {
        Uuid::new_v4()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers `sender` under `id` and arms its timeout.
    pub fn register(self: &Arc<Self>, id: CorrelationId, sender: ReplySender, context: PendingContext) {
        self.lock().insert(
            id,
            PendingReply {
                sender,
                context,
                registered_at: Instant::now(),
            },
        );

        let table: Weak<Self> = Arc::downgrade(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(id);
            }
        });
    }

    /// Mints an id, registers `sender` under it and returns the id.
    pub fn register_new(self: &Arc<Self>, sender: ReplySender, context: PendingContext) -> CorrelationId {
        let id = Self::next_id();
        self.register(id, sender, context);
        id
    }

    /// Completes the caller registered under `id`.
    ///
    /// Returns `false` on a correlation miss.
    pub fn complete(&self, id: CorrelationId, outcome: Result<Payload, FailureReason>) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            warn!(correlation_id = %id, "answer for unknown correlation id dropped");
            return false;
        };
        debug!(
            correlation_id = %id,
            address = %entry.context.address,
            operation = %entry.context.operation,
            elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "correlated answer received"
        );
        if entry.sender.send(outcome.map_err(GridError::from)).is_err() {
            debug!(correlation_id = %id, "caller stopped waiting before the answer");
        }
        true
    }

    /// Fails the caller registered under `id` with a timeout.
    pub fn expire(&self, id: CorrelationId) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        warn!(
            correlation_id = %id,
            address = %entry.context.address,
            operation = %entry.context.operation,
            timeout_ms = self.timeout.as_millis() as u64,
            "correlated request timed out"
        );
        let _ = entry.sender.send(Err(GridError::Timeout));
        true
    }

    /// Fails the caller registered under `id` with `error`, e.g. when the transmit failed.
    pub fn fail(&self, id: CorrelationId, error: GridError) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        let _ = entry.sender.send(Err(error));
        true
    }

    /// Removes the entry under `id` without completing it and hands back the
    /// caller's reply sender.
    pub fn take(&self, id: CorrelationId) -> Option<ReplySender> {
        self.lock().remove(&id).map(|entry| entry.sender)
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> PendingContext {
        PendingContext {
            address: "a".to_string(),
            operation: "incr".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        let id = table.register_new(tx, context());
        assert!(table.contains(&id));

        assert!(table.complete(id, Ok(json!(7))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(7));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_a_miss() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        assert!(!table.complete(Uuid::new_v4(), Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_remote_failure_reaches_caller() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        let id = table.register_new(tx, context());
        table.complete(id, Err(FailureReason::Handler("boom".to_string())));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(GridError::Remote(FailureReason::Handler(msg))) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_late_answer_misses() {
        let table = CorrelationTable::new(Duration::from_millis(20));
        let (tx, rx) = oneshot::channel();
        let id = table.register_new(tx, context());

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(GridError::Timeout)));
        assert!(!table.contains(&id));
        assert!(!table.complete(id, Ok(json!(1))));
    }

    #[tokio::test]
    async fn test_take_returns_sender_uncompleted() {
        let table = CorrelationTable::new(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        let id = table.register_new(tx, context());

        let sender = table.take(id).unwrap();
        assert!(!table.contains(&id));
        assert!(!table.complete(id, Ok(json!(1))));
        sender.send(Ok(json!("local"))).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!("local"));
    }

    #[tokio::test]
    async fn test_complete_wins_over_timeout() {
        let table = CorrelationTable::new(Duration::from_millis(30));
        let (tx, rx) = oneshot::channel();
        let id = table.register_new(tx, context());
        assert!(table.complete(id, Ok(json!("done"))));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!table.expire(id));
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
    }
}
