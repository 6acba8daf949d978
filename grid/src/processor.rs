//! # Local Activation
//!
//! Runs one actor on this node: a tokio task pops envelopes from the local
//! queue one at a time, awaits the handler and completes the envelope's reply
//! channel. The task parks while the queue is suspended and ends when the
//! queue is closed.
//!
//! The actor instance sits behind an async mutex so relocation can take the
//! snapshot once the queue is suspended and idle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use grid_api::actor::GridActor;
use grid_api::address::Address;
use grid_api::types::{GridResult, Payload};

use crate::mailbox::LocalMailbox;

pub type SharedActor = Arc<Mutex<Box<dyn GridActor>>>;

pub struct Activation {
    address: Address,
    actor: SharedActor,
    task: JoinHandle<()>,
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("address", &self.address)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl Activation {
    /// Starts processing `queue` with `actor`.
    pub fn spawn(address: Address, actor: Box<dyn GridActor>, queue: Arc<LocalMailbox>) -> Self {
        let actor: SharedActor = Arc::new(Mutex::new(actor));
        let task = tokio::spawn(Self::run(address.clone(), Arc::clone(&actor), queue));
        Self {
            address,
            actor,
            task,
        }
    }

    async fn run(address: Address, actor: SharedActor, queue: Arc<LocalMailbox>) {
        if let Err(error) = actor.lock().await.started(&address).await {
            warn!(address = %address, error = %error, "actor start hook failed");
        }
        debug!(address = %address, "activation running");

        while let Some(envelope) = queue.pop().await {
            let result = {
                let mut instance = actor.lock().await;
                instance.handle(&envelope.work.operation, envelope.work.args).await
            };
            match envelope.reply {
                Some(reply) => {
                    if reply.send(result).is_err() {
                        debug!(address = %address, "caller stopped waiting for reply");
                    }
                }
                None => {
                    if let Err(error) = result {
                        warn!(
                            address = %address,
                            operation = %envelope.work.operation,
                            error = %error,
                            "one-way message failed"
                        );
                    }
                }
            }
            // replied before going idle, so a relocation never drops a finished reply
            queue.finish();
        }
        debug!(address = %address, "activation stopped");
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn snapshot(&self) -> GridResult<Payload> {
        self.actor.lock().await.snapshot().await
    }

    pub async fn restore(&self, snapshot: Payload) -> GridResult<()> {
        self.actor.lock().await.restore(snapshot).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        // a replaced activation must never keep consuming a reopened queue
        self.task.abort();
    }
}
