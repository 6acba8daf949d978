//! # Health Gate
//!
//! A FIFO of deferred actions that only runs work while the cluster is judged
//! healthy.
//!
//! ```text
//!            close()                 open()
//!   Open ───────────────▶ Closed ───────────────▶ Draining ──(queue empty)──▶ Open
//!     ▲                     ▲                        │
//!     │                     └──────── close() ───────┘
//!     └── submissions run immediately only here
//! ```
//!
//! While `Draining`, new submissions still queue behind the drained ones, so
//! nothing that was deferred earlier is overtaken by later work.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use grid_api::types::BoxedFuture;

/// A unit of deferred work.
pub type DeferredAction = Box<dyn FnOnce() -> BoxedFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
    Draining,
}

struct GateInner {
    state: GateState,
    queue: VecDeque<DeferredAction>,
}

pub struct HealthGate {
    name: String,
    /// When false the gate ignores `close`.
    buffering: bool,
    inner: Mutex<GateInner>,
    /// Serializes drains.
    drain_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for HealthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("HealthGate")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

impl HealthGate {
    pub fn new(name: impl Into<String>, open: bool, buffering: bool) -> Self {
        let state = if open || !buffering {
            GateState::Open
        } else {
            GateState::Closed
        };
        Self {
            name: name.into(),
            buffering,
            inner: Mutex::new(GateInner {
                state,
                queue: VecDeque::new(),
            }),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == GateState::Open
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `item` as a deferred action unless the gate is open.
    ///
    /// Returns `Some(item)` when the gate is open; the caller then runs the
    /// work itself. The open-check and the enqueue happen under one lock, so
    /// a concurrent `open` can never strand an entry.
    pub fn defer<T>(&self, item: T, into_action: impl FnOnce(T) -> DeferredAction) -> Option<T> {
        let mut inner = self.lock();
        if inner.state == GateState::Open {
            return Some(item);
        }
        inner.queue.push_back(into_action(item));
        None
    }

    /// Runs `action` now if open, otherwise queues it.
    pub async fn submit(&self, action: DeferredAction) {
        if let Some(action) = self.defer(action, |action| action) {
            action().await;
        }
    }

    /// Stops immediate execution. A drain in progress stops after its current entry.
    pub fn close(&self) {
        if !self.buffering {
            return;
        }
        let mut inner = self.lock();
        inner.state = GateState::Closed;
    }

    /// Drains everything queued, in order, then opens the gate.
    ///
    /// Returns the number of actions run. Opening an open gate is a no-op.
    pub async fn open(&self) -> usize {
        let _drain = self.drain_lock.lock().await;
        let mut drained = 0;
        loop {
            let batch = {
                let mut inner = self.lock();
                if inner.state == GateState::Open {
                    return drained;
                }
                if inner.queue.is_empty() {
                    inner.state = GateState::Open;
                    return drained;
                }
                inner.state = GateState::Draining;
                std::mem::take(&mut inner.queue)
            };

            let mut batch = batch.into_iter();
            while let Some(action) = batch.next() {
                {
                    let mut inner = self.lock();
                    if inner.state == GateState::Closed {
                        // put the rest back ahead of anything queued meanwhile
                        let mut rest: VecDeque<DeferredAction> = std::iter::once(action)
                            .chain(batch)
                            .collect();
                        rest.append(&mut inner.queue);
                        inner.queue = rest;
                        return drained;
                    }
                }
                action().await;
                drained += 1;
            }
        }
    }

    /// Drops every queued action. Returns how many were dropped.
    pub fn discard(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.queue.len();
        inner.queue.clear();
        dropped
    }
}
