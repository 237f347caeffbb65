use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, DistributedBroker, LocalBroker};
use crate::client::Client;
use crate::exchange::MemoryExchange;
use crate::persistence::FileLogStore;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::websocket::{handle_text, serve};

fn broker() -> (TempDir, Arc<dyn Broker>) {
    let dir = tempdir().unwrap();
    let broker: Arc<dyn Broker> =
        Arc::new(LocalBroker::new(Arc::new(FileLogStore::new(dir.path()))).unwrap());
    (dir, broker)
}

fn decode(frame: WsMessage) -> ServerMessage {
    match frame {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[test]
fn test_client_message_wire_format() {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"subscribe","topic":"news","filter":"election"}"#)
            .unwrap();
    assert_eq!(
        msg,
        ClientMessage::Subscribe {
            topic: "news".to_string(),
            filter: Some("election".to_string()),
        }
    );
    let msg: ClientMessage = serde_json::from_str(r#"{"type":"topics"}"#).unwrap();
    assert_eq!(msg, ClientMessage::Topics);

    let reply = serde_json::to_value(ServerMessage::Message {
        topic: "news".to_string(),
        payload: "x".to_string(),
    })
    .unwrap();
    assert_eq!(reply, json!({"type": "message", "topic": "news", "payload": "x"}));
}

#[tokio::test]
async fn test_handle_subscribe_and_publish() {
    let (_dir, broker) = broker();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = Client::new(tx);

    let subscribe = json!({"type": "subscribe", "topic": "test_topic"}).to_string();
    assert!(handle_text(broker.as_ref(), &mut client, &subscribe).is_none());
    assert!(client.is_subscribed("test_topic"));

    let publish = json!({"type": "publish", "topic": "test_topic", "payload": "hello"}).to_string();
    assert!(handle_text(broker.as_ref(), &mut client, &publish).is_none());

    assert_eq!(
        decode(rx.try_recv().unwrap()),
        ServerMessage::Message {
            topic: "test_topic".to_string(),
            payload: "hello".to_string(),
        }
    );
}

#[tokio::test]
async fn test_handle_unsubscribe() {
    let (_dir, broker) = broker();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = Client::new(tx);
    client.subscribe(broker.as_ref(), "test_topic", None).unwrap();

    let unsubscribe = json!({"type": "unsubscribe", "topic": "test_topic"}).to_string();
    assert!(handle_text(broker.as_ref(), &mut client, &unsubscribe).is_none());
    assert!(!client.is_subscribed("test_topic"));

    broker.publish("test_topic", "hello").unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_handle_topics_and_search() {
    let (_dir, broker) = broker();
    broker.publish("news", "Election day").unwrap();
    broker.publish("sports", "goal").unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut client = Client::new(tx);

    let topics = handle_text(broker.as_ref(), &mut client, r#"{"type":"topics"}"#);
    assert_eq!(
        topics,
        Some(ServerMessage::Topics {
            topics: vec!["news".to_string(), "sports".to_string()],
        })
    );

    let found = handle_text(
        broker.as_ref(),
        &mut client,
        r#"{"type":"search","keyword":"election"}"#,
    );
    assert_eq!(
        found,
        Some(ServerMessage::Topics {
            topics: vec!["news".to_string()],
        })
    );
}

#[tokio::test]
async fn test_invalid_requests_get_error_replies() {
    let (_dir, broker) = broker();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut client = Client::new(tx);

    let reply = handle_text(broker.as_ref(), &mut client, "not json");
    assert!(matches!(reply, Some(ServerMessage::Error { .. })));

    let bad_name = json!({"type": "publish", "topic": "../etc", "payload": "x"}).to_string();
    let reply = handle_text(broker.as_ref(), &mut client, &bad_name);
    assert!(matches!(reply, Some(ServerMessage::Error { .. })));
}

#[tokio::test]
async fn test_gateway_end_to_end() {
    let (_dir, broker) = broker();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broker.clone()));

    let url = format!("ws://{addr}");
    let (mut ws_a, _) = connect_async(url.as_str()).await.expect("client A connect");
    let (mut ws_b, _) = connect_async(url.as_str()).await.expect("client B connect");

    let sub = json!({"type": "subscribe", "topic": "test"}).to_string();
    ws_b.send(WsMessage::text(sub)).await.unwrap();

    // Wait until B's subscription is in place by round-tripping a request.
    ws_b.send(WsMessage::text(r#"{"type":"topics"}"#)).await.unwrap();
    let reply = decode(ws_b.next().await.unwrap().unwrap());
    assert!(matches!(reply, ServerMessage::Topics { .. }));

    let publish = json!({"type": "publish", "topic": "test", "payload": "hello world"}).to_string();
    ws_a.send(WsMessage::text(publish)).await.unwrap();

    let delivered = decode(ws_b.next().await.unwrap().unwrap());
    assert_eq!(
        delivered,
        ServerMessage::Message {
            topic: "test".to_string(),
            payload: "hello world".to_string(),
        }
    );
    assert_eq!(broker.get_topics(), vec!["test"]);
}

#[tokio::test]
async fn test_gateway_releases_distributed_subscriptions_on_disconnect() {
    let dir = tempdir().unwrap();
    let server = MemoryExchange::new();
    let broker: Arc<dyn Broker> = Arc::new(
        DistributedBroker::new(
            Arc::new(FileLogStore::new(dir.path())),
            Arc::new(server.clone()),
            "pubsub_exchange",
        )
        .unwrap(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broker.clone()));

    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.expect("connect");
    let sub = json!({"type": "subscribe", "topic": "news"}).to_string();
    ws.send(WsMessage::text(sub)).await.unwrap();
    let publish = json!({"type": "publish", "topic": "news", "payload": "hi"}).to_string();
    ws.send(WsMessage::text(publish)).await.unwrap();

    assert_eq!(
        decode(ws.next().await.unwrap().unwrap()),
        ServerMessage::Message {
            topic: "news".to_string(),
            payload: "hi".to_string(),
        }
    );
    assert_eq!(server.connection_count(), 2);

    ws.close(None).await.unwrap();
    drop(ws);
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connection_count() != 1 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connection_count(), 1);
}
