//! Per-user subscription lists.

use std::sync::Arc;

use super::{Keyspace, LogStore};
use crate::utils::Result;

/// Remembers which topics each user is subscribed to so a later session can
/// restore them.
#[derive(Debug, Clone)]
pub struct SubscriptionBook {
    store: Arc<dyn LogStore>,
}

impl SubscriptionBook {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Overwrite the saved list for `username`.
    pub fn save(&self, username: &str, topics: &[String]) -> Result<()> {
        self.store
            .replace(Keyspace::Subscriptions, username, topics)
    }

    /// Saved topics for `username` in saved order, without duplicates.
    pub fn load(&self, username: &str) -> Result<Vec<String>> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.store.read_all(Keyspace::Subscriptions, username)? {
            if !topic.is_empty() && !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        Ok(topics)
    }
}
