use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use grid::protocol::{
    Answer, Codec, ControlMessage, Forward, GridDeliver, JsonCodec, MessageVisitor, Relocate,
    Start,
};
use grid_api::address::AddressFactory;
use grid_api::errors::FailureReason;
use grid_api::types::{GridResult, NodeId, UnitOfWork};

fn deliver(n: i64, correlated: bool) -> GridDeliver {
    GridDeliver {
        protocol: "counter".to_string(),
        address: AddressFactory::new().with_id("account-1", Some("account".to_string())),
        params: json!({ "initial": 0, "tags": ["a", "b"] }),
        work: UnitOfWork::new("add", json!(n)),
        correlation_id: correlated.then(Uuid::new_v4),
    }
}

fn every_variant() -> Vec<ControlMessage> {
    let factory = AddressFactory::new();
    vec![
        ControlMessage::Start(Start {
            protocol: "counter".to_string(),
            address: factory.unique_named("started"),
            params: json!({ "initial": 3 }),
        }),
        ControlMessage::GridDeliver(deliver(1, true)),
        ControlMessage::GridDeliver(deliver(2, false)),
        ControlMessage::Answer(Answer {
            correlation_id: Uuid::new_v4(),
            outcome: Ok(json!({ "total": 12.5, "ok": true })),
        }),
        ControlMessage::Answer(Answer {
            correlation_id: Uuid::new_v4(),
            outcome: Err(FailureReason::Handler("boom".to_string())),
        }),
        ControlMessage::Relocate(Relocate {
            protocol: "counter".to_string(),
            address: factory.with_id("moving", None),
            params: json!(null),
            snapshot: json!({ "count": 10, "history": [1, 2, 3] }),
            pending: vec![deliver(1, true), deliver(2, false)],
            correlation_id: Some(Uuid::new_v4()),
        }),
        ControlMessage::Forward(Forward {
            original_sender: NodeId(1),
            message: Box::new(ControlMessage::GridDeliver(deliver(3, true))),
        }),
    ]
}

#[test]
fn test_every_variant_survives_the_codec() {
    let codec = JsonCodec;
    for message in every_variant() {
        let frame = codec.encode(&message).unwrap();
        let decoded = codec.decode(&frame).unwrap();
        assert_eq!(decoded, message, "{} changed on the wire", message.kind());
        // address flags survive too, not just the id
        if let (Some(sent), Some(received)) = (message.address(), decoded.address()) {
            assert_eq!(sent.name(), received.name());
            assert_eq!(sent.is_distributable(), received.is_distributable());
        }
    }
}

#[test]
fn test_forwarding_keeps_first_sender() {
    let once = ControlMessage::GridDeliver(deliver(1, true)).forwarded_from(NodeId(1));
    let twice = once.clone().forwarded_from(NodeId(5));
    match twice {
        ControlMessage::Forward(forward) => {
            assert_eq!(forward.original_sender, NodeId(1));
            assert_eq!(forward.message.kind(), "grid_deliver");
        }
        other => panic!("expected forward, got {}", other.kind()),
    }
}

#[test]
fn test_routing_address_of_each_variant() {
    for message in every_variant() {
        match &message {
            ControlMessage::Answer(_) => assert!(message.address().is_none()),
            _ => assert!(message.address().is_some()),
        }
    }
}

/// Records what it was asked to visit.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(&'static str, NodeId, NodeId)>>,
}

impl Recorder {
    fn record(&self, kind: &'static str, receiver: NodeId, sender: NodeId) -> GridResult<()> {
        self.seen.lock().unwrap().push((kind, receiver, sender));
        Ok(())
    }
}

#[async_trait]
impl MessageVisitor for Recorder {
    async fn visit_start(&self, receiver: NodeId, sender: NodeId, _message: Start) -> GridResult<()> {
        self.record("start", receiver, sender)
    }

    async fn visit_deliver(
        &self,
        receiver: NodeId,
        sender: NodeId,
        _message: GridDeliver,
    ) -> GridResult<()> {
        self.record("deliver", receiver, sender)
    }

    async fn visit_answer(&self, receiver: NodeId, sender: NodeId, _message: Answer) -> GridResult<()> {
        self.record("answer", receiver, sender)
    }

    async fn visit_relocate(
        &self,
        receiver: NodeId,
        sender: NodeId,
        _message: Relocate,
    ) -> GridResult<()> {
        self.record("relocate", receiver, sender)
    }
}

#[tokio::test]
async fn test_accept_dispatches_each_variant() {
    let recorder = Recorder::default();
    for message in every_variant() {
        message.accept(NodeId(2), NodeId(3), &recorder).await.unwrap();
    }
    let kinds: Vec<_> = recorder.seen.lock().unwrap().iter().map(|(kind, ..)| *kind).collect();
    assert_eq!(
        kinds,
        vec!["start", "deliver", "deliver", "answer", "answer", "relocate", "deliver"]
    );
}

#[tokio::test]
async fn test_forward_dispatches_inner_with_original_sender() {
    let recorder = Recorder::default();
    let forward = ControlMessage::Forward(Forward {
        original_sender: NodeId(7),
        message: Box::new(ControlMessage::Relocate(Relocate {
            protocol: "counter".to_string(),
            address: AddressFactory::new().with_id("moving", None),
            params: json!(null),
            snapshot: json!(null),
            pending: Vec::new(),
            correlation_id: None,
        })),
    });
    forward.accept(NodeId(2), NodeId(3), &recorder).await.unwrap();
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![("relocate", NodeId(2), NodeId(7))]
    );
}
