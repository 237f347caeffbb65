use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::{Broker, Callback};
use crate::transport::message::ServerMessage;
use crate::utils::Result;

/// A connected WebSocket client.
///
/// Each client is identified by `id`, receives frames through `sender`, and
/// holds one broker callback per subscribed topic so the subscription can be
/// cancelled later.
#[derive(Debug)]
pub struct Client {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
    subscriptions: HashMap<String, Callback>,
}

impl Client {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            subscriptions: HashMap::new(),
        }
    }

    /// Queue a server message for this client. Returns `false` once the
    /// connection is gone.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.sender.send(WsMessage::text(json)).is_ok(),
            Err(e) => {
                tracing::error!(client = %self.id, "failed to serialize server message: {e}");
                false
            }
        }
    }

    fn forwarder(&self, topic: &str) -> Callback {
        let sender = self.sender.clone();
        let topic = topic.to_string();
        Callback::from_fn(move |payload| {
            let message = ServerMessage::Message {
                topic: topic.clone(),
                payload: payload.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&message) {
                let _ = sender.send(WsMessage::text(json));
            }
        })
    }

    /// Subscribe this client to `topic`, replacing an earlier subscription
    /// to the same topic.
    pub fn subscribe(&mut self, broker: &dyn Broker, topic: &str, filter: Option<&str>) -> Result<()> {
        self.unsubscribe(broker, topic)?;
        let callback = self.forwarder(topic);
        broker.subscribe(topic, callback.clone(), filter)?;
        self.subscriptions.insert(topic.to_string(), callback);
        Ok(())
    }

    pub fn unsubscribe(&mut self, broker: &dyn Broker, topic: &str) -> Result<bool> {
        match self.subscriptions.remove(topic) {
            Some(callback) => {
                broker.unsubscribe(topic, &callback)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains_key(topic)
    }

    /// Cancel every subscription, e.g. on disconnect.
    pub fn cleanup(&mut self, broker: &dyn Broker) {
        for (topic, callback) in self.subscriptions.drain() {
            if let Err(e) = broker.unsubscribe(&topic, &callback) {
                tracing::warn!(client = %self.id, %topic, "unsubscribe on cleanup failed: {e}");
            }
        }
    }
}
