use serde::{Deserialize, Serialize};

/// Requests a WebSocket client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        topic: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: String,
    },
    Topics,
    Search {
        keyword: String,
    },
}

/// Frames the gateway sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A message delivered on a subscribed topic.
    Message { topic: String, payload: String },
    Topics { topics: Vec<String> },
    Error { message: String },
}
