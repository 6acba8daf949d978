use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::timeout;

use grid_api::actor::Residency;
use grid_api::address::Address;
use grid_api::errors::GridError;
use grid_api::types::{GridResult, Payload, UnitOfWork};

use crate::mailbox::{Envelope, Mailbox, RingAwareMailbox};

/// Slack on top of the correlation timeout, so a remote ask is failed by the
/// correlation table rather than by the caller's own wait.
const ASK_GRACE: Duration = Duration::from_millis(250);

/// Location-transparent handle to one actor.
#[derive(Clone)]
pub struct GridRef {
    mailbox: Arc<RingAwareMailbox>,
    timeout: Duration,
}

impl fmt::Debug for GridRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridRef")
            .field("address", self.mailbox.address())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GridRef {
    pub(crate) fn new(mailbox: Arc<RingAwareMailbox>, timeout: Duration) -> Self {
        Self { mailbox, timeout }
    }

    pub fn address(&self) -> &Address {
        self.mailbox.address()
    }

    pub fn mailbox(&self) -> &Arc<RingAwareMailbox> {
        &self.mailbox
    }

    /// Where the actor lives as seen from this node.
    pub async fn residency(&self) -> Residency {
        self.mailbox.residency().await
    }

    /// Fire-and-forget.
    pub async fn tell(&self, operation: impl Into<String>, args: Payload) -> GridResult<()> {
        self.mailbox
            .send(Envelope::tell(UnitOfWork::new(operation, args)))
            .await
    }

    /// Sends a request and waits for its result.
    pub async fn ask(&self, operation: impl Into<String>, args: Payload) -> GridResult<Payload> {
        self.ask_with_timeout(operation, args, self.timeout).await
    }

    pub async fn ask_with_timeout(
        &self,
        operation: impl Into<String>,
        args: Payload,
        timeout_duration: Duration,
    ) -> GridResult<Payload> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(Envelope::ask(UnitOfWork::new(operation, args), tx))
            .await?;

        match timeout(timeout_duration + ASK_GRACE, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GridError::MailboxClosed(self.address().id().to_string())),
            Err(_) => Err(GridError::Timeout),
        }
    }

    /// Typed ask: `args` and the result go through serde.
    pub async fn ask_as<A, R>(&self, operation: impl Into<String>, args: &A) -> GridResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|error| GridError::Codec(error.to_string()))?;
        let reply = self.ask(operation, args).await?;
        serde_json::from_value(reply).map_err(|error| GridError::Codec(error.to_string()))
    }
}
