use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::spawn;
use tokio::task::spawn_blocking;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Result;

/// Apply one request from `client` to the broker. Returns the reply frame,
/// if the request has one.
pub fn handle_client_message(
    broker: &dyn Broker,
    client: &mut Client,
    message: ClientMessage,
) -> Option<ServerMessage> {
    let outcome: Result<Option<ServerMessage>> = match message {
        ClientMessage::Subscribe { topic, filter } => {
            debug!(client = %client.id, %topic, "subscribe");
            client
                .subscribe(broker, &topic, filter.as_deref())
                .map(|_| None)
        }
        ClientMessage::Unsubscribe { topic } => {
            debug!(client = %client.id, %topic, "unsubscribe");
            client.unsubscribe(broker, &topic).map(|_| None)
        }
        ClientMessage::Publish { topic, payload } => {
            debug!(client = %client.id, %topic, "publish");
            broker.publish(&topic, &payload).map(|_| None)
        }
        ClientMessage::Topics => Ok(Some(ServerMessage::Topics {
            topics: broker.get_topics(),
        })),
        ClientMessage::Search { keyword } => broker
            .search_topics_by_keyword(&keyword)
            .map(|topics| Some(ServerMessage::Topics { topics })),
    };

    outcome.unwrap_or_else(|e| {
        warn!(client = %client.id, "request failed: {e}");
        Some(ServerMessage::Error {
            message: e.to_string(),
        })
    })
}

/// Parse a text frame and handle it.
pub fn handle_text(broker: &dyn Broker, client: &mut Client, text: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => handle_client_message(broker, client, message),
        Err(err) => {
            warn!(client = %client.id, "invalid client message: {err} | {text}");
            Some(ServerMessage::Error {
                message: format!("invalid message: {err}"),
            })
        }
    }
}

/// Accept WebSocket connections on `addr` until the listener fails.
pub async fn start_websocket_server(addr: &str, broker: Arc<dyn Broker>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket gateway listening on ws://{addr}");
    serve(listener, broker).await
}

pub async fn serve(listener: TcpListener, broker: Arc<dyn Broker>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();

        spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!(%peer, "WebSocket handshake error: {e}");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
            let mut client = Client::new(tx);
            let client_id = client.id.clone();
            info!(client = %client_id, %peer, "connected");

            // broker -> client
            let send_id = client_id.clone();
            spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ws_sender.send(msg).await {
                        warn!(client = %send_id, "failed to send frame: {e}");
                        break;
                    }
                }
                debug!(client = %send_id, "send loop closed");
            });

            // client -> broker. Broker calls block on storage and exchange
            // I/O, so they run on the blocking pool.
            while let Some(Ok(msg)) = ws_receiver.next().await {
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else {
                    continue;
                };
                let text = text.to_owned();
                let handler_broker = broker.clone();
                let handled = spawn_blocking(move || {
                    let reply = handle_text(handler_broker.as_ref(), &mut client, &text);
                    (client, reply)
                })
                .await;
                match handled {
                    Ok((returned, reply)) => {
                        client = returned;
                        if let Some(reply) = reply {
                            client.send(&reply);
                        }
                    }
                    Err(e) => {
                        error!(client = %client_id, "request handler failed: {e}");
                        return;
                    }
                }
            }

            let cleanup = spawn_blocking(move || client.cleanup(broker.as_ref())).await;
            if let Err(e) = cleanup {
                error!(client = %client_id, "cleanup failed: {e}");
            }
            info!(client = %client_id, "disconnected");
        });
    }
}
