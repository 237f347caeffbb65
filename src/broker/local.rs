//! In-process broker.
//!
//! Topics, their histories and their subscriber lists live in one map behind
//! a mutex. Delivery is a direct call into each matching callback from the
//! publishing thread. The recipient list is copied and the lock released
//! before any callback runs, so callbacks may publish, subscribe or
//! unsubscribe without deadlocking or disturbing the ongoing fan-out.
//!
//! The replay also runs outside the lock. Messages published during it are
//! buffered on the new subscription and delivered once the history is done.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::Broker;
use super::callback::{Callback, Filter, contains_ignore_case};
use super::topic::Topic;
use crate::persistence::{Keyspace, LogStore};
use crate::utils::Result;

#[derive(Debug)]
pub struct LocalBroker {
    store: Arc<dyn LogStore>,
    topics: Mutex<BTreeMap<String, Topic>>,
}

impl LocalBroker {
    /// Build the broker, eagerly loading every persisted topic history.
    pub fn new(store: Arc<dyn LogStore>) -> Result<Self> {
        let mut topics = BTreeMap::new();
        for name in store.list_namespaces(Keyspace::Topics)? {
            let history = store.read_all(Keyspace::Topics, &name)?;
            topics.insert(name.clone(), Topic::with_history(&name, history));
        }
        info!(topics = topics.len(), "local broker loaded topic histories");
        Ok(Self {
            store,
            topics: Mutex::new(topics),
        })
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }
}

impl Broker for LocalBroker {
    fn subscribe(&self, topic: &str, callback: Callback, filter: Option<&str>) -> Result<()> {
        let filter = Filter::new(filter);
        let (id, replay) = {
            let mut topics = self.topics.lock();
            let entry = topics
                .entry(topic.to_string())
                .or_insert_with(|| Topic::new(topic));
            let replay = entry.history_matching(&filter);
            (entry.subscribe(callback.clone(), filter), replay)
        };
        debug!(topic, replayed = replay.len(), "subscribed");

        // Anything published meanwhile was buffered; deliver it until the
        // subscription goes live or is dropped.
        let mut batch = replay;
        loop {
            for message in &batch {
                callback.deliver(message);
            }
            let next = self
                .topics
                .lock()
                .get_mut(topic)
                .and_then(|t| t.drain_backlog(id));
            match next {
                Some(more) if !more.is_empty() => batch = more,
                _ => break,
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, callback: &Callback) -> Result<()> {
        let mut topics = self.topics.lock();
        if let Some(t) = topics.get_mut(topic) {
            if t.unsubscribe(callback).is_some() {
                debug!(topic, "unsubscribed");
            }
            if !t.is_published() && t.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
        Ok(())
    }

    fn publish(&self, topic: &str, message: &str) -> Result<()> {
        self.store.append(Keyspace::Topics, topic, message)?;

        let recipients = {
            let mut topics = self.topics.lock();
            let entry = topics
                .entry(topic.to_string())
                .or_insert_with(|| Topic::new(topic));
            entry.messages.push(message.to_string());
            entry.recipients(message)
        };

        debug!(topic, recipients = recipients.len(), "publishing");
        for callback in &recipients {
            callback.deliver(message);
        }
        Ok(())
    }

    fn get_topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .values()
            .filter(|t| t.is_published())
            .map(|t| t.name.clone())
            .collect()
    }

    fn search_topics_by_keyword(&self, keyword: &str) -> Result<Vec<String>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .topics
            .lock()
            .values()
            .filter(|t| t.messages.iter().any(|m| contains_ignore_case(m, &needle)))
            .map(|t| t.name.clone())
            .collect())
    }
}
