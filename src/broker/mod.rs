//! The `broker` module owns topics, subscriptions and delivery.
//!
//! Both backends implement the `Broker` contract:
//! - `LocalBroker` delivers synchronously on the publishing thread.
//! - `DistributedBroker` delivers through a topic exchange, one consumer
//!   worker thread per subscription.
//!
//! Filters are case-sensitive substrings; keyword search over history is
//! case-insensitive. Unknown topics and unknown callbacks are no-ops.

pub mod callback;
pub mod distributed;
pub mod local;
pub mod topic;
mod worker;

use std::sync::Arc;

use tracing::info;

use crate::config::{BrokerBackend, Settings};
use crate::exchange::ExchangeConnector;
use crate::persistence::LogStore;
use crate::utils::Result;

pub use callback::{Callback, Filter, MessageHandler};
pub use distributed::DistributedBroker;
pub use local::LocalBroker;

pub trait Broker: Send + Sync {
    /// Replay matching history to `callback` in stored order, then keep
    /// delivering matching messages published later.
    fn subscribe(&self, topic: &str, callback: Callback, filter: Option<&str>) -> Result<()>;

    /// Drop the first subscription on `topic` registered with `callback` and
    /// release whatever it owns.
    fn unsubscribe(&self, topic: &str, callback: &Callback) -> Result<()>;

    /// Persist `message` under `topic`, then deliver it to matching
    /// subscriptions.
    fn publish(&self, topic: &str, message: &str) -> Result<()>;

    /// Every topic ever published to, sorted by name.
    fn get_topics(&self) -> Vec<String>;

    /// Topics with at least one message containing `keyword`, ignoring case.
    fn search_topics_by_keyword(&self, keyword: &str) -> Result<Vec<String>>;
}

/// Build the backend selected by `settings`. `connector` is only used by
/// the distributed backend.
pub fn open(
    settings: &Settings,
    store: Arc<dyn LogStore>,
    connector: Arc<dyn ExchangeConnector>,
) -> Result<Arc<dyn Broker>> {
    info!(backend = ?settings.broker.backend, "starting broker");
    let broker: Arc<dyn Broker> = match settings.broker.backend {
        BrokerBackend::Local => Arc::new(LocalBroker::new(store)?),
        BrokerBackend::Distributed => Arc::new(DistributedBroker::new(
            store,
            connector,
            &settings.exchange.name,
        )?),
    };
    Ok(broker)
}
