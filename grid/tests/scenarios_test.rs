// End-to-end placement scenarios on the in-memory network.


use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use grid::protocol::{Answer, Codec, ControlMessage, GridDeliver, JsonCodec, Relocate};
use grid::{Envelope, GridConfig, Mailbox};
use grid_api::actor::{ActorSpec, Residency};
use grid_api::errors::{FailureReason, GridError};
use grid_api::types::{NodeId, UnitOfWork};
use uuid::Uuid;

use test_helpers::*;

fn deliver_frame(spec: &ActorSpec, work: UnitOfWork, correlation_id: Option<Uuid>) -> Vec<u8> {
    JsonCodec
        .encode(&ControlMessage::GridDeliver(GridDeliver {
            protocol: spec.protocol.clone(),
            address: spec.address.clone(),
            params: spec.params.clone(),
            work,
            correlation_id,
        }))
        .unwrap()
}

fn answers(transport: &RecordingTransport) -> Vec<Answer> {
    transport
        .sent()
        .into_iter()
        .filter_map(|(_, message)| match message {
            ControlMessage::Answer(answer) => Some(answer),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_deliver_executes_on_owner_and_answers() {
    let cluster = Cluster::start(&[1, 2, 3], GridConfig::default()).await;
    let one = cluster.node(1);
    let key = key_owned_by(&one.ring(), 2, "scenario-a");
    let address = one.address_factory().with_id(key.clone(), None);

    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    assert_eq!(counter.residency().await, Residency::Remote);

    assert_eq!(counter.ask("add", json!(5)).await.unwrap(), json!(5));
    assert_eq!(counter.ask("add", json!(2)).await.unwrap(), json!(7));

    let hosted = cluster.node(2).directory().lookup(&key).unwrap();
    assert_eq!(hosted.residency().await, Residency::Local);
    assert!(cluster.node(3).directory().lookup(&key).is_none());
    assert_eq!(one.correlations().pending_count(), 0);
}

#[tokio::test]
async fn test_stale_owner_forwards_to_new_owner() {
    let mut cluster = Cluster::start(&[1, 2, 3], GridConfig::default()).await;
    let four = cluster.spawn_node(4);
    for peer in [1, 2, 3] {
        four.node_joined(NodeId(peer)).await;
    }

    let before = ring_of(&[1, 2, 3], 100);
    let after = ring_of(&[1, 2, 3, 4], 100);
    let key = find_key("scenario-b", |key| {
        before.node_of(key) == Some(NodeId(2)) && after.node_of(key) == Some(NodeId(4))
    });

    // node 2 learns about node 4, node 1 does not
    cluster.node(2).node_joined(NodeId(4)).await;

    let one = cluster.node(1);
    let address = one.address_factory().with_id(key.clone(), None);
    let counter = one
        .actor_for(COUNTER, counter_params(10), address)
        .await
        .unwrap();
    assert_eq!(counter.ask("add", json!(1)).await.unwrap(), json!(11));

    let hosted = four.directory().lookup(&key).unwrap();
    assert_eq!(hosted.residency().await, Residency::Local);
    assert!(cluster.node(2).directory().lookup(&key).is_none());
}

#[tokio::test]
async fn test_join_relocates_state_and_pending_messages_in_order() {
    let mut cluster = Cluster::start(&[1], GridConfig::default()).await;
    let two = cluster.spawn_node(2);
    two.node_joined(NodeId(1)).await;

    let key = key_owned_by(&ring_of(&[1, 2], 100), 2, "scenario-c");
    let one = cluster.node(1);
    let address = one.address_factory().with_id(key.clone(), None);
    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    assert_eq!(counter.residency().await, Residency::Local);
    assert_eq!(counter.ask("add", json!(10)).await.unwrap(), json!(10));

    // keep the activation busy so the next two stay queued
    let busy = {
        let counter = counter.clone();
        tokio::spawn(async move { counter.ask("slow", json!(150)).await })
    };
    wait_for(30).await;

    let mailbox = counter.mailbox();
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    mailbox
        .send(Envelope::ask(UnitOfWork::new("add", json!(1)), first_tx))
        .await
        .unwrap();
    mailbox
        .send(Envelope::ask(UnitOfWork::new("add", json!(2)), second_tx))
        .await
        .unwrap();
    assert_eq!(mailbox.queue().len(), 2);

    assert_eq!(one.node_joined(NodeId(2)).await, 1);
    assert_eq!(counter.residency().await, Residency::Remote);

    assert_eq!(busy.await.unwrap().unwrap(), json!(10));
    assert_eq!(first_rx.await.unwrap().unwrap(), json!(11));
    assert_eq!(second_rx.await.unwrap().unwrap(), json!(13));

    let hosted = two.directory().lookup(&key).unwrap();
    assert_eq!(hosted.residency().await, Residency::Local);
    assert_eq!(counter.ask("get", json!(null)).await.unwrap(), json!(13));
}

#[tokio::test]
async fn test_unhealthy_cluster_buffers_outbound_until_restored() {
    let (grid, transport) = recording_node(1, &[2], GridConfig::default()).await;
    let key = key_owned_by(&grid.ring(), 2, "scenario-d");
    let address = grid.address_factory().with_id(key, None);
    let spec = ActorSpec::new(COUNTER, address, counter_params(0));

    grid.set_health(false).await;
    for n in 1..=3 {
        grid.outbound()
            .grid_deliver(NodeId(2), spec.clone(), UnitOfWork::new("add", json!(n)), None)
            .await
            .unwrap();
    }
    assert_eq!(transport.len(), 0);
    assert_eq!(grid.outbound().buffered_for(NodeId(2)), 3);

    assert_eq!(grid.set_health(true).await, 3);
    let args: Vec<_> = transport
        .sent()
        .into_iter()
        .map(|(to, message)| {
            assert_eq!(to, NodeId(2));
            match message {
                ControlMessage::GridDeliver(deliver) => deliver.work.args,
                other => panic!("unexpected {}", other.kind()),
            }
        })
        .collect();
    assert_eq!(args, vec![json!(1), json!(2), json!(3)]);

    assert_eq!(grid.set_health(true).await, 0);
    assert_eq!(transport.len(), 3);
}

#[tokio::test]
async fn test_unanswered_request_times_out_and_late_answer_misses() {
    let config = GridConfig::default().with_correlation_timeout(Duration::from_millis(100));
    let (grid, transport) = recording_node(1, &[2], config).await;
    let key = key_owned_by(&grid.ring(), 2, "scenario-e");
    let address = grid.address_factory().with_id(key, None);

    let counter = grid
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    let result = counter.ask("get", json!(null)).await;
    assert!(matches!(result, Err(GridError::Timeout)));
    assert_eq!(grid.correlations().pending_count(), 0);

    let correlation_id = transport
        .sent()
        .into_iter()
        .find_map(|(_, message)| match message {
            ControlMessage::GridDeliver(deliver) => deliver.correlation_id,
            _ => None,
        })
        .unwrap();
    assert!(!grid.correlations().contains(&correlation_id));

    let late = JsonCodec
        .encode(&ControlMessage::Answer(Answer {
            correlation_id,
            outcome: Ok(json!(1)),
        }))
        .unwrap();
    grid.receive(&late, NodeId(2)).await.unwrap();
    assert!(!grid.correlations().complete(correlation_id, Ok(json!(1))));
    assert_eq!(grid.correlations().pending_count(), 0);
}

#[tokio::test]
async fn test_remote_handler_failure_reaches_caller() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    let key = key_owned_by(&one.ring(), 2, "failure");
    let address = one.address_factory().with_id(key, None);
    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();

    let result = counter.ask("fail", json!("boom")).await;
    assert!(matches!(
        result,
        Err(GridError::Remote(FailureReason::Handler(ref msg))) if msg == "boom"
    ));
}

#[tokio::test]
async fn test_unknown_protocol_on_owner_is_rejected() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    one.register_protocol("ghost", counter_factory);
    let key = key_owned_by(&one.ring(), 2, "ghost");
    let address = one.address_factory().with_id(key, None);

    let ghost = one.actor_for("ghost", json!(null), address).await.unwrap();
    let result = ghost.ask("get", json!(null)).await;
    assert!(matches!(
        result,
        Err(GridError::Remote(FailureReason::Rejected(_)))
    ));
}

#[tokio::test]
async fn test_inbound_work_waits_for_health() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    let two = cluster.node(2);
    two.set_health(false).await;

    let key = key_owned_by(&one.ring(), 2, "inbound");
    let address = one.address_factory().with_id(key.clone(), None);
    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    counter.tell("add", json!(4)).await.unwrap();

    // Start and GridDeliver are both held
    assert!(wait_until(1_000, || two.inbound().buffered() == 2).await);
    assert!(two.directory().lookup(&key).is_none());

    assert_eq!(two.set_health(true).await, 2);
    assert_eq!(counter.ask("get", json!(null)).await.unwrap(), json!(4));
}

#[tokio::test]
async fn test_departed_owner_relocalizes_on_next_send() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    let key = key_owned_by(&one.ring(), 2, "departed");
    let address = one.address_factory().with_id(key, None);
    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    assert_eq!(counter.ask("add", json!(3)).await.unwrap(), json!(3));

    cluster.network.disconnect(NodeId(2));
    assert!(one.node_left(NodeId(2)).await);
    assert!(!one.node_left(NodeId(2)).await);

    // state on the departed node is gone; a fresh activation starts here
    assert_eq!(counter.ask("get", json!(null)).await.unwrap(), json!(0));
    assert_eq!(counter.residency().await, Residency::Local);
}

#[tokio::test]
async fn test_non_distributable_address_stays_local() {
    let cluster = Cluster::start(&[1, 2, 3], GridConfig::default()).await;
    let one = cluster.node(1);
    let address = one.address_factory().local("console");
    let counter = one
        .actor_for(COUNTER, counter_params(1), address)
        .await
        .unwrap();
    assert_eq!(counter.residency().await, Residency::Local);
    assert_eq!(counter.ask("add", json!(1)).await.unwrap(), json!(2));

    assert_eq!(one.node_joined(NodeId(4)).await, 0);
    assert_eq!(counter.residency().await, Residency::Local);
}

#[tokio::test]
async fn test_repeated_join_changes_nothing() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    let before = one.ring();
    assert_eq!(one.node_joined(NodeId(2)).await, 0);
    assert_eq!(one.ring().points(), before.points());
}

#[tokio::test]
async fn test_failed_relocation_keeps_actor_and_pending_work_local() {
    let mut cluster = Cluster::start(&[1], GridConfig::default()).await;
    cluster.spawn_node(2);
    cluster.network.disconnect(NodeId(2));

    let key = key_owned_by(&ring_of(&[1, 2], 100), 2, "unreachable");
    let one = cluster.node(1);
    let address = one.address_factory().with_id(key, None);
    let counter = one
        .actor_for(COUNTER, counter_params(0), address)
        .await
        .unwrap();
    assert_eq!(counter.ask("add", json!(42)).await.unwrap(), json!(42));

    let busy = {
        let counter = counter.clone();
        tokio::spawn(async move { counter.ask("slow", json!(100)).await })
    };
    wait_for(20).await;
    let (queued_tx, queued_rx) = oneshot::channel();
    counter
        .mailbox()
        .send(Envelope::ask(UnitOfWork::new("add", json!(1)), queued_tx))
        .await
        .unwrap();

    assert_eq!(one.node_joined(NodeId(2)).await, 0);
    assert_eq!(counter.residency().await, Residency::Local);
    assert!(!counter.mailbox().is_suspended());

    assert_eq!(busy.await.unwrap().unwrap(), json!(42));
    assert_eq!(queued_rx.await.unwrap().unwrap(), json!(43));
    assert_eq!(counter.ask("get", json!(null)).await.unwrap(), json!(43));
    assert_eq!(one.correlations().pending_count(), 0);
}

#[tokio::test]
async fn test_relocate_into_busy_actor_does_not_stall_other_traffic() {
    let cluster = Cluster::start(&[1, 2], GridConfig::default()).await;
    let one = cluster.node(1);
    let two = cluster.node(2);

    let busy_key = key_owned_by(&two.ring(), 2, "busy");
    let busy = two
        .actor_for(COUNTER, counter_params(0), two.address_factory().with_id(busy_key, None))
        .await
        .unwrap();
    let slow = {
        let busy = busy.clone();
        tokio::spawn(async move { busy.ask("slow", json!(600)).await })
    };
    wait_for(30).await;

    let spec = ActorSpec::new(COUNTER, busy.address().clone(), counter_params(0));
    let relocate = JsonCodec
        .encode(&ControlMessage::Relocate(Relocate {
            protocol: spec.protocol.clone(),
            address: spec.address.clone(),
            params: spec.params.clone(),
            snapshot: json!({ "count": 50 }),
            pending: vec![GridDeliver {
                protocol: spec.protocol.clone(),
                address: spec.address.clone(),
                params: spec.params.clone(),
                work: UnitOfWork::new("add", json!(1)),
                correlation_id: None,
            }],
            correlation_id: None,
        }))
        .unwrap();
    tokio::time::timeout(Duration::from_millis(200), two.receive(&relocate, NodeId(1)))
        .await
        .expect("relocate handling waited on the running handler")
        .unwrap();

    // an unrelated actor on the same node answers while the busy one still runs
    let other_key = key_owned_by(&one.ring(), 2, "bystander");
    let other = one
        .actor_for(COUNTER, counter_params(7), one.address_factory().with_id(other_key, None))
        .await
        .unwrap();
    let started = std::time::Instant::now();
    assert_eq!(other.ask("get", json!(null)).await.unwrap(), json!(7));
    assert!(started.elapsed() < Duration::from_millis(300));

    assert_eq!(slow.await.unwrap().unwrap(), json!(0));
    assert_eq!(busy.ask("get", json!(null)).await.unwrap(), json!(51));
}

#[tokio::test]
async fn test_owner_answers_timeout_once_when_handler_overruns() {
    let config = GridConfig::default().with_correlation_timeout(Duration::from_millis(100));
    let (grid, transport) = recording_node(2, &[1], config).await;
    let key = key_owned_by(&grid.ring(), 2, "overrun");
    let spec = ActorSpec::new(COUNTER, grid.address_factory().with_id(key.clone(), None), counter_params(0));

    let id = Uuid::new_v4();
    grid.receive(&deliver_frame(&spec, UnitOfWork::new("slow", json!(300)), Some(id)), NodeId(1))
        .await
        .unwrap();
    assert!(grid.directory().lookup(&key).is_some());

    // past the handler's own completion, so a second answer would show up
    wait_for(450).await;
    let answers = answers(&transport);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].correlation_id, id);
    assert_eq!(answers[0].outcome, Err(FailureReason::Timeout));
    assert!(transport.sent().iter().all(|(to, _)| *to == NodeId(1)));
}

#[tokio::test]
async fn test_owner_answers_unavailable_when_queue_closes_first() {
    let (grid, transport) = recording_node(2, &[1], GridConfig::default()).await;
    let key = key_owned_by(&grid.ring(), 2, "closing");
    let spec = ActorSpec::new(COUNTER, grid.address_factory().with_id(key, None), counter_params(0));
    let mailbox = grid.allocate_mailbox(&spec).unwrap();
    assert!(mailbox.suspend());

    let id = Uuid::new_v4();
    grid.receive(&deliver_frame(&spec, UnitOfWork::new("add", json!(1)), Some(id)), NodeId(1))
        .await
        .unwrap();
    assert_eq!(mailbox.queue().len(), 1);
    mailbox.close().await;

    assert!(wait_until(1_000, || !answers(&transport).is_empty()).await);
    let answers = answers(&transport);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].correlation_id, id);
    assert!(matches!(answers[0].outcome, Err(FailureReason::Unavailable(_))));
}
