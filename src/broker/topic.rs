//! Topic state for the local broker.
//!
//! A `Topic` owns its message history (arrival order, append only) and the
//! ordered list of subscriptions delivering from it.
//!
//! A new subscription starts out buffered: messages published while its
//! history is being replayed are kept in its backlog instead of being handed
//! out, and the broker drains that backlog after the replay. Live messages
//! therefore always follow the history.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the local
//! broker keeps every topic behind one lock).

use super::callback::{Callback, Filter};

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: u64,
    pub callback: Callback,
    pub filter: Filter,
    /// `Some` until the replay is over.
    backlog: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub messages: Vec<String>,
    pub subscribers: Vec<Subscription>,
    next_id: u64,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self::with_history(name, Vec::new())
    }

    pub fn with_history(name: &str, messages: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            messages,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    /// A topic is known once something has been published to it.
    pub fn is_published(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Add a buffered subscription and return its id. The same callback may
    /// be registered more than once.
    pub fn subscribe(&mut self, callback: Callback, filter: Filter) -> u64 {
        self.next_id += 1;
        self.subscribers.push(Subscription {
            id: self.next_id,
            callback,
            filter,
            backlog: Some(Vec::new()),
        });
        self.next_id
    }

    /// Take what subscription `id` buffered so far. Once there is nothing
    /// left it goes live and an empty list is returned. `None` if the
    /// subscription is gone.
    pub fn drain_backlog(&mut self, id: u64) -> Option<Vec<String>> {
        let subscription = self.subscribers.iter_mut().find(|s| s.id == id)?;
        let backlog = subscription.backlog.take().unwrap_or_default();
        if !backlog.is_empty() {
            subscription.backlog = Some(Vec::new());
        }
        Some(backlog)
    }

    /// Remove the first subscription registered with `callback`.
    pub fn unsubscribe(&mut self, callback: &Callback) -> Option<Subscription> {
        let position = self
            .subscribers
            .iter()
            .position(|s| s.callback.same(callback))?;
        Some(self.subscribers.remove(position))
    }

    /// Messages in history admitted by `filter`, oldest first.
    pub fn history_matching(&self, filter: &Filter) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| filter.admits(m))
            .cloned()
            .collect()
    }

    /// Callbacks that should receive `message` now, in registration order.
    /// Buffered subscriptions keep it in their backlog instead.
    pub fn recipients(&mut self, message: &str) -> Vec<Callback> {
        let mut recipients = Vec::new();
        for subscription in &mut self.subscribers {
            if !subscription.filter.admits(message) {
                continue;
            }
            match &mut subscription.backlog {
                Some(backlog) => backlog.push(message.to_string()),
                None => recipients.push(subscription.callback.clone()),
            }
        }
        recipients
    }
}
