use std::sync::Arc;

use tempfile::tempdir;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::pubsub_client::Client;
use crate::broker::{Broker, LocalBroker};
use crate::persistence::FileLogStore;
use crate::transport::message::ServerMessage;

fn decode(frame: WsMessage) -> ServerMessage {
    match frame {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[test]
fn test_client_new() {
    let (tx, _) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    assert!(client.id.starts_with("client-"));
}

#[test]
fn test_client_subscription_forwards_messages() {
    let dir = tempdir().unwrap();
    let broker = LocalBroker::new(Arc::new(FileLogStore::new(dir.path()))).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let mut client = Client::new(tx);

    broker.publish("sports", "alice: go team").unwrap();
    client.subscribe(&broker, "sports", None).unwrap();
    assert!(client.is_subscribed("sports"));

    assert_eq!(
        decode(rx.try_recv().unwrap()),
        ServerMessage::Message {
            topic: "sports".to_string(),
            payload: "alice: go team".to_string(),
        }
    );

    client.cleanup(&broker);
    assert!(!client.is_subscribed("sports"));
    broker.publish("sports", "bob: nice").unwrap();
    assert!(rx.try_recv().is_err());
}
