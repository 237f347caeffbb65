use std::sync::Arc;

use crossbeam_channel::{Receiver, unbounded};

use super::{
    ConsumerEvent, DeliverySink, ExchangeChannel, ExchangeConnector, ExchangeError, ExchangeKind,
    MemoryExchange,
};

const EXCHANGE: &str = "pubsub_exchange";

fn channel_sink() -> (DeliverySink, Receiver<ConsumerEvent>) {
    let (tx, rx) = unbounded();
    let sink: DeliverySink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, rx)
}

fn bound_queue(channel: &dyn ExchangeChannel, key: &str) -> String {
    channel
        .declare_exchange(EXCHANGE, ExchangeKind::Topic, true)
        .unwrap();
    let queue = channel.declare_exclusive_queue().unwrap();
    channel.bind_queue(&queue, EXCHANGE, key).unwrap();
    queue
}

#[test]
fn test_publish_reaches_bound_consumer() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    let queue = bound_queue(channel.as_ref(), "sports");
    let (sink, rx) = channel_sink();
    channel.consume(&queue, sink).unwrap();

    channel.publish(EXCHANGE, "sports", b"alice: go team").unwrap();
    channel.publish(EXCHANGE, "news", b"unrelated").unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        ConsumerEvent::Delivery(b"alice: go team".to_vec())
    );
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_each_queue_gets_its_own_copy() {
    let server = MemoryExchange::new();
    let mut receivers = Vec::new();
    let mut connections = Vec::new();
    for _ in 0..2 {
        let connection = server.connect().unwrap();
        let channel = connection.open_channel().unwrap();
        let queue = bound_queue(channel.as_ref(), "sports");
        let (sink, rx) = channel_sink();
        channel.consume(&queue, sink).unwrap();
        receivers.push(rx);
        connections.push((connection, channel));
    }

    let publisher = server.connect().unwrap().open_channel().unwrap();
    publisher.publish(EXCHANGE, "sports", b"bob: nice").unwrap();

    for rx in receivers {
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsumerEvent::Delivery(b"bob: nice".to_vec())
        );
    }
}

#[test]
fn test_backlog_is_flushed_when_consumer_attaches() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    let queue = bound_queue(channel.as_ref(), "news");

    channel.publish(EXCHANGE, "news", b"first").unwrap();
    channel.publish(EXCHANGE, "news", b"second").unwrap();

    let (sink, rx) = channel_sink();
    channel.consume(&queue, sink).unwrap();
    assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::Delivery(b"first".to_vec()));
    assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::Delivery(b"second".to_vec()));
}

#[test]
fn test_cancel_notifies_consumer_and_stops_delivery() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    let queue = bound_queue(channel.as_ref(), "news");
    let (sink, rx) = channel_sink();
    let tag = channel.consume(&queue, sink).unwrap();

    channel.cancel(&tag).unwrap();
    assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::Cancelled);

    channel.publish(EXCHANGE, "news", b"late").unwrap();
    assert!(rx.try_recv().is_err());
    assert!(matches!(
        channel.cancel(&tag),
        Err(ExchangeError::NotFound(_))
    ));
}

#[test]
fn test_closing_connection_deletes_exclusive_queue() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    bound_queue(channel.as_ref(), "news");
    assert_eq!(server.queue_count(), 1);
    assert_eq!(server.binding_count(EXCHANGE, "news"), 1);

    connection.close().unwrap();

    assert_eq!(server.queue_count(), 0);
    assert_eq!(server.binding_count(EXCHANGE, "news"), 0);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        channel.publish(EXCHANGE, "news", b"x"),
        Err(ExchangeError::ConnectionLost)
    );
    assert_eq!(connection.close(), Err(ExchangeError::ConnectionLost));
}

#[test]
fn test_closed_channel_is_reported_as_transient() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    channel
        .declare_exchange(EXCHANGE, ExchangeKind::Topic, true)
        .unwrap();
    channel.close().unwrap();

    let err = channel.publish(EXCHANGE, "news", b"x").unwrap_err();
    assert_eq!(err, ExchangeError::ChannelClosed);
    assert!(err.is_transient());
}

#[test]
fn test_unavailable_server_refuses_connections() {
    let server = MemoryExchange::new();
    server.set_available(false);
    let err = server.connect().err().unwrap();
    assert!(matches!(err, ExchangeError::ConnectionRefused(_)));
    assert!(!err.is_transient());

    server.set_available(true);
    assert!(server.connect().is_ok());
}

#[test]
fn test_sever_connections_cancels_consumers() {
    let server = MemoryExchange::new();
    let connection = server.connect().unwrap();
    let channel = connection.open_channel().unwrap();
    let queue = bound_queue(channel.as_ref(), "news");
    let (sink, rx) = channel_sink();
    channel.consume(&queue, sink).unwrap();

    server.sever_connections();

    assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::Cancelled);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        channel.publish(EXCHANGE, "news", b"x"),
        Err(ExchangeError::ConnectionLost)
    );
}

#[test]
fn test_redeclaring_exchange_with_other_kind_fails() {
    let server = MemoryExchange::new();
    let channel = server.connect().unwrap().open_channel().unwrap();
    channel
        .declare_exchange(EXCHANGE, ExchangeKind::Topic, true)
        .unwrap();
    channel
        .declare_exchange(EXCHANGE, ExchangeKind::Topic, true)
        .unwrap();
    assert!(matches!(
        channel.declare_exchange(EXCHANGE, ExchangeKind::Fanout, true),
        Err(ExchangeError::Protocol(_))
    ));
}

#[test]
fn test_publish_to_undeclared_exchange_fails() {
    let server = MemoryExchange::new();
    let channel = server.connect().unwrap().open_channel().unwrap();
    assert!(matches!(
        channel.publish("missing", "news", b"x"),
        Err(ExchangeError::NotFound(_))
    ));
}
