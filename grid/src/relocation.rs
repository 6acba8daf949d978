//! # Relocation
//!
//! When a node joins, ownership of some locally hosted addresses moves to it.
//! Planning diffs the ring before and after the join; execution hands each
//! moved address to its new owner and watches for the acknowledgement.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::warn;

use grid_api::actor::Residency;
use grid_api::address::Address;
use grid_api::types::NodeId;

use crate::log_relocation;
use crate::mailbox::{Mailbox, RingAwareMailbox};
use crate::ring::HashRing;

/// The node that now owns `address`, if ownership moved away from `local`.
pub fn moved_away(
    before: &HashRing,
    after: &HashRing,
    local: NodeId,
    address: &Address,
) -> Option<NodeId> {
    if !address.is_distributable() {
        return None;
    }
    if !before.is_owner(local, address.id()) {
        return None;
    }
    match after.node_of(address.id()) {
        Some(owner) if owner != local => Some(owner),
        _ => None,
    }
}

/// One address to hand over.
#[derive(Debug)]
pub struct Move {
    pub mailbox: Arc<RingAwareMailbox>,
    pub to: NodeId,
}

/// Addresses hosted here whose owner changed between `before` and `after`.
///
/// Skips addresses that are not currently local or whose queue is already
/// suspended.
pub async fn plan(
    before: &HashRing,
    after: &HashRing,
    local: NodeId,
    mailboxes: Vec<Arc<RingAwareMailbox>>,
) -> Vec<Move> {
    let mut moves = Vec::new();
    for mailbox in mailboxes {
        let Some(to) = moved_away(before, after, local, mailbox.address()) else {
            continue;
        };
        if mailbox.residency().await != Residency::Local || mailbox.is_suspended() {
            continue;
        }
        moves.push(Move { mailbox, to });
    }
    moves
}

/// Relocates every planned address concurrently. Returns how many were
/// handed off.
pub async fn execute(moves: Vec<Move>) -> usize {
    join_all(moves.into_iter().map(relocate_one))
        .await
        .into_iter()
        .filter(|shipped| *shipped)
        .count()
}

async fn relocate_one(Move { mailbox, to }: Move) -> bool {
    let address = mailbox.address().clone();
    let pending = mailbox.queue().len();
    let (ack_tx, ack_rx) = oneshot::channel();
    log_relocation!(address, "suspending", to = %to, pending);

    match mailbox.relocate_to(to, Some(ack_tx)).await {
        Ok(true) => {
            log_relocation!(address, "shipped", to = %to);
            tokio::spawn(async move {
                match ack_rx.await {
                    Ok(Ok(_)) => log_relocation!(address, "acknowledged", by = %to),
                    Ok(Err(error)) => warn!(
                        address = %address,
                        to = %to,
                        error = %error,
                        "relocation not acknowledged"
                    ),
                    Err(_) => warn!(address = %address, to = %to, "relocation ack dropped"),
                }
            });
            true
        }
        Ok(false) => {
            log_relocation!(address, "skipped", to = %to);
            false
        }
        Err(error) => {
            warn!(
                address = %address,
                to = %to,
                error = %error,
                "relocation failed; actor stays local"
            );
            false
        }
    }
}
