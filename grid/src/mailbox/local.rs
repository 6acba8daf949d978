use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use grid_api::types::GridResult;

use crate::error::MailboxError;
use crate::mailbox::{Envelope, Mailbox};

/// Gate on the local activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Envelopes are handed to the activation.
    Open,
    /// Envelopes queue up but are not handed out.
    Suspended,
    /// Pushes fail and `receive` returns `None`.
    Closed,
}

struct QueueInner {
    queue: VecDeque<Envelope>,
    state: QueueState,
    /// An envelope has been handed out and not yet finished.
    in_flight: bool,
}

/// Single-consumer FIFO feeding one local activation.
///
/// Pop and state check happen under one lock, so once `suspend` returns no
/// further envelope is handed out until `resume`.
pub struct LocalMailbox {
    path: String,
    capacity: Option<usize>,
    inner: Mutex<QueueInner>,
    /// Wakes the consumer on push, resume and close.
    ready: Notify,
    /// Wakes `wait_idle` when the in-flight envelope finishes.
    idle: Notify,
}

impl fmt::Debug for LocalMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LocalMailbox")
            .field("path", &self.path)
            .field("state", &inner.state)
            .field("len", &inner.queue.len())
            .field("in_flight", &inner.in_flight)
            .finish()
    }
}

impl LocalMailbox {
    pub fn new(path: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            path: path.into(),
            capacity,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                state: QueueState::Open,
                in_flight: false,
            }),
            ready: Notify::new(),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, envelope: Envelope) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if inner.state == QueueState::Closed {
            return Err(MailboxError::Closed);
        }
        if let Some(capacity) = self.capacity {
            if inner.queue.len() >= capacity {
                return Err(MailboxError::Full { capacity });
            }
        }
        inner.queue.push_back(envelope);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Puts `envelopes` ahead of everything already queued, keeping their order.
    ///
    /// Ignores capacity: these were accepted once already.
    pub fn push_front_all(&self, envelopes: Vec<Envelope>) -> Result<(), MailboxError> {
        let mut inner = self.lock();
        if inner.state == QueueState::Closed {
            return Err(MailboxError::Closed);
        }
        for envelope in envelopes.into_iter().rev() {
            inner.queue.push_front(envelope);
        }
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Waits for the next envelope while open.
    ///
    /// Marks it in flight; the consumer calls [`LocalMailbox::finish`] once handled.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            {
                let mut inner = self.lock();
                match inner.state {
                    QueueState::Closed => return None,
                    QueueState::Open => {
                        if let Some(envelope) = inner.queue.pop_front() {
                            inner.in_flight = true;
                            return Some(envelope);
                        }
                    }
                    QueueState::Suspended => {}
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn finish(&self) {
        self.lock().in_flight = false;
        self.idle.notify_waiters();
    }

    /// Resolves once no envelope is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.lock().in_flight {
                return;
            }
            notified.await;
        }
    }

    pub fn suspend_queue(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != QueueState::Open {
            return false;
        }
        inner.state = QueueState::Suspended;
        true
    }

    pub fn resume_queue(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != QueueState::Suspended {
            return false;
        }
        inner.state = QueueState::Open;
        drop(inner);
        self.ready.notify_one();
        true
    }

    /// Closes the queue and hands back whatever was still waiting.
    pub fn close_queue(&self) -> Vec<Envelope> {
        let mut inner = self.lock();
        inner.state = QueueState::Closed;
        let leftover: Vec<Envelope> = inner.queue.drain(..).collect();
        drop(inner);
        self.ready.notify_one();
        leftover
    }

    /// Reopens a closed queue for a new activation.
    pub fn reopen(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != QueueState::Closed {
            return false;
        }
        inner.state = QueueState::Open;
        inner.in_flight = false;
        true
    }

    pub fn take_all(&self) -> Vec<Envelope> {
        self.lock().queue.drain(..).collect()
    }
}

#[async_trait]
impl Mailbox for LocalMailbox {
    async fn send(&self, envelope: Envelope) -> GridResult<()> {
        self.push(envelope).map_err(|error| error.into_grid_error(&self.path))
    }

    async fn receive(&self) -> Option<Envelope> {
        self.pop().await
    }

    async fn close(&self) {
        // dropping the leftovers drops their reply senders; askers see the mailbox closed
        let _ = self.close_queue();
    }

    async fn is_closed(&self) -> bool {
        self.state() == QueueState::Closed
    }

    async fn pending_count(&self) -> usize {
        self.len()
    }

    fn suspend(&self) -> bool {
        self.suspend_queue()
    }

    fn resume(&self) -> bool {
        self.resume_queue()
    }

    fn is_suspended(&self) -> bool {
        self.state() == QueueState::Suspended
    }

    fn drain_pending(&self) -> Vec<Envelope> {
        self.take_all()
    }

    fn path(&self) -> &str {
        &self.path
    }
}
