use std::sync::Arc;

use serde_json::json;

use grid_api::actor::{ActorFactory, ActorSpec, GridActor, SharedFactory};
use grid_api::address::{Address, AddressFactory};
use grid_api::errors::GridError;
use grid_api::membership::ClusterEvent;
use grid_api::types::{BoxedFuture, GridResult, NodeId, Payload};

struct Echo {
    greeting: String,
}

impl GridActor for Echo {
    fn handle<'a>(&'a mut self, operation: &'a str, args: Payload) -> BoxedFuture<'a, GridResult<Payload>> {
        Box::pin(async move {
            match operation {
                "echo" => Ok(json!({ "greeting": self.greeting, "args": args })),
                other => Err(GridError::Handler(format!("no operation {other}"))),
            }
        })
    }
}

fn echo_factory(_address: &Address, params: &Payload) -> GridResult<Box<dyn GridActor>> {
    let greeting = params["greeting"].as_str().unwrap_or("hi").to_string();
    Ok(Box::new(Echo { greeting }))
}

#[tokio::test]
async fn test_closure_factory_builds_from_params() {
    let factory: SharedFactory = Arc::new(echo_factory);
    let address = AddressFactory::new().unique();
    let mut actor = factory.create(&address, &json!({ "greeting": "hello" })).unwrap();

    actor.started(&address).await.unwrap();
    let reply = actor.handle("echo", json!(3)).await.unwrap();
    assert_eq!(reply, json!({ "greeting": "hello", "args": 3 }));
    assert!(matches!(actor.handle("other", json!(null)).await, Err(GridError::Handler(_))));
}

#[tokio::test]
async fn test_default_snapshot_and_restore() {
    let address = AddressFactory::new().unique();
    let mut actor = echo_factory(&address, &json!(null)).unwrap();
    assert_eq!(actor.snapshot().await.unwrap(), Payload::Null);
    actor.restore(json!({ "ignored": true })).await.unwrap();
}

#[test]
fn test_spec_carries_protocol_and_params() {
    let address = AddressFactory::new().with_id("echo-1", None);
    let spec = ActorSpec::new("echo", address.clone(), json!({ "greeting": "yo" }));
    let back: ActorSpec = serde_json::from_value(serde_json::to_value(&spec).unwrap()).unwrap();
    assert_eq!(back, spec);
    assert_eq!(back.address, address);
}

#[test]
fn test_cluster_event_node() {
    assert_eq!(ClusterEvent::NodeJoined(NodeId(3)).node(), Some(NodeId(3)));
    assert_eq!(ClusterEvent::NodeLeft(NodeId(4)).node(), Some(NodeId(4)));
    assert_eq!(ClusterEvent::HealthChanged { healthy: false }.node(), None);
    assert_eq!(NodeId::from(9).value(), 9);
}
