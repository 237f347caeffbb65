//! Broker that fans out through a topic exchange.
//!
//! Publishing appends to the Durable Log Store first and only then routes the
//! message to the exchange with the topic as routing key. The shared publish
//! connection is reopened once when the exchange reports a stale channel or
//! connection; if the retried publish fails too the failure is logged and
//! swallowed, since the message is already persisted.
//!
//! Each subscription gets its own connection, exclusive queue and binding
//! plus a worker thread (see `worker`). Two subscriptions to one topic
//! therefore each receive every message.
//!
//! The publish lock doubles as a gate between persisting and routing: a
//! publish holds it across both steps, and `subscribe` holds it while it
//! binds the queue and reads the history. Every message published through
//! this broker is then either in the replayed history or routed to the new
//! queue, never both and never neither. Queued deliveries wait in the inbox
//! until the replay is done, so live messages follow the history.
//!
//! The registry of subscription handles is only touched by callers of the
//! broker; workers only read their own `LinkState`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::Broker;
use super::callback::{Callback, Filter, contains_ignore_case};
use super::worker::{self, ConsumerLink, LinkState, WorkerEvent, WorkerJob};
use crate::exchange::{
    ExchangeChannel, ExchangeConnection, ExchangeConnector, ExchangeError, ExchangeResult,
};
use crate::persistence::{Keyspace, LogStore};
use crate::utils::{Error, Result};

pub const DEFAULT_EXCHANGE: &str = "pubsub_exchange";

/// The long-lived publishing connection.
struct Publisher {
    connector: Arc<dyn ExchangeConnector>,
    exchange: String,
    link: Option<(Box<dyn ExchangeConnection>, Box<dyn ExchangeChannel>)>,
}

impl Publisher {
    fn open(&mut self) -> ExchangeResult<()> {
        self.link = Some(worker::connect_declared(
            self.connector.as_ref(),
            &self.exchange,
        )?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some((connection, channel)) = self.link.take() {
            worker::close_quietly(connection, Some(channel), "publisher");
        }
    }

    fn reopen(&mut self) -> ExchangeResult<()> {
        self.close();
        self.open()
    }

    fn publish(&self, routing_key: &str, payload: &[u8]) -> ExchangeResult<()> {
        match &self.link {
            Some((_, channel)) => channel.publish(&self.exchange, routing_key, payload),
            None => Err(ExchangeError::ConnectionLost),
        }
    }

    /// Publish, reconnecting and retrying once on a stale channel.
    fn publish_with_retry(&mut self, routing_key: &str, payload: &[u8]) -> ExchangeResult<()> {
        match self.publish(routing_key, payload) {
            Err(e) if e.is_transient() => {
                warn!(topic = routing_key, "publish channel is stale, reconnecting: {e}");
                self.reopen()?;
                self.publish(routing_key, payload)
            }
            other => other,
        }
    }
}

/// Bookkeeping for one live subscription.
struct SubscriptionHandle {
    topic: String,
    callback: Callback,
    state: Arc<Mutex<LinkState>>,
    control: Sender<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    fn release(mut self) {
        let previous = std::mem::replace(&mut *self.state.lock(), LinkState::Released);
        debug!(topic = %self.topic, state = previous.name(), "releasing subscription");

        if self.control.send(WorkerEvent::Stop).is_err() {
            debug!(topic = %self.topic, "worker already gone");
        }
        if let LinkState::Active(link) = previous {
            link.release(&self.topic);
        }

        if let Some(handle) = self.thread.take() {
            // A callback unsubscribing itself runs on the worker thread.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(topic = %self.topic, "subscription worker panicked");
            }
        }
    }
}

pub struct DistributedBroker {
    store: Arc<dyn LogStore>,
    connector: Arc<dyn ExchangeConnector>,
    exchange: String,
    topics: Mutex<BTreeSet<String>>,
    publisher: Mutex<Publisher>,
    subscriptions: Mutex<HashMap<String, Vec<SubscriptionHandle>>>,
}

impl DistributedBroker {
    /// Open the publish connection on `exchange` and load the topic list.
    /// Histories are read lazily from the store.
    pub fn new(
        store: Arc<dyn LogStore>,
        connector: Arc<dyn ExchangeConnector>,
        exchange: &str,
    ) -> Result<Self> {
        let mut publisher = Publisher {
            connector: connector.clone(),
            exchange: exchange.to_string(),
            link: None,
        };
        publisher.open()?;

        let topics: BTreeSet<String> = store
            .list_namespaces(Keyspace::Topics)?
            .into_iter()
            .collect();
        info!(exchange, topics = topics.len(), "distributed broker connected");

        Ok(Self {
            store,
            connector,
            exchange: exchange.to_string(),
            topics: Mutex::new(topics),
            publisher: Mutex::new(publisher),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    fn forward(&self, topic: &str, message: &str) -> ExchangeResult<()> {
        self.publisher
            .lock()
            .publish_with_retry(topic, message.as_bytes())
    }

    /// Route every stored message to the exchange without persisting it
    /// again. Returns how many messages were forwarded.
    pub fn replay_history_to_exchange(&self) -> Result<usize> {
        let topics = self.get_topics();
        let mut forwarded = 0;
        for topic in &topics {
            for message in self.store.read_all(Keyspace::Topics, topic)? {
                self.forward(topic, &message)?;
                forwarded += 1;
            }
        }
        info!(
            exchange = %self.exchange,
            topics = topics.len(),
            forwarded,
            "replayed history to the exchange"
        );
        Ok(forwarded)
    }

    /// Open a consumer link for `topic`, then bind it and read the history
    /// under the publish gate. A link that cannot be set up is logged and
    /// left out; the subscription then only gets the replay.
    fn attach(
        &self,
        topic: &str,
        events: &Sender<WorkerEvent>,
    ) -> Result<(Option<ConsumerLink>, Vec<String>)> {
        let mut link = match ConsumerLink::open(self.connector.as_ref(), &self.exchange, events) {
            Ok(link) => Some(link),
            Err(e) => {
                error!(topic, "subscription setup failed, no live delivery: {e}");
                None
            }
        };

        let _gate = self.publisher.lock();
        if let Some(bound) = link.take() {
            match bound.bind(&self.exchange, topic) {
                Ok(()) => link = Some(bound),
                Err(e) => {
                    error!(topic, "binding the subscription queue failed, no live delivery: {e}");
                    bound.release(topic);
                }
            }
        }
        match self.store.read_all(Keyspace::Topics, topic) {
            Ok(history) => Ok((link, history)),
            Err(e) => {
                if let Some(link) = link {
                    link.release(topic);
                }
                Err(e)
            }
        }
    }

    /// Remove the handle sharing `state` from the registry.
    fn take_handle(
        &self,
        topic: &str,
        state: &Arc<Mutex<LinkState>>,
    ) -> Option<SubscriptionHandle> {
        let mut subscriptions = self.subscriptions.lock();
        let handles = subscriptions.get_mut(topic)?;
        let position = handles.iter().position(|h| Arc::ptr_eq(&h.state, state))?;
        let handle = handles.remove(position);
        if handles.is_empty() {
            subscriptions.remove(topic);
        }
        Some(handle)
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions.lock().get(topic).map_or(0, Vec::len)
    }
}

impl Broker for DistributedBroker {
    fn subscribe(&self, topic: &str, callback: Callback, filter: Option<&str>) -> Result<()> {
        let filter = Filter::new(filter);
        let (events, inbox) = crossbeam_channel::unbounded();
        let (link, history) = self.attach(topic, &events)?;
        let live = link.is_some();
        let state = Arc::new(Mutex::new(link.map_or(LinkState::Failed, LinkState::Active)));

        self.subscriptions
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(SubscriptionHandle {
                topic: topic.to_string(),
                callback: callback.clone(),
                state: state.clone(),
                control: events,
                thread: None,
            });

        for message in history.iter().filter(|m| filter.admits(m)) {
            callback.deliver(message);
        }
        debug!(topic, replayed = history.len(), live, "subscribed");
        if !live {
            return Ok(());
        }

        let job = WorkerJob {
            topic: topic.to_string(),
            filter,
            callback,
            state: state.clone(),
            inbox,
        };
        let thread = match worker::spawn(job) {
            Ok(thread) => thread,
            Err(e) => {
                if let Some(handle) = self.take_handle(topic, &state) {
                    handle.release();
                }
                return Err(Error::Spawn(e));
            }
        };

        let orphan = {
            let mut subscriptions = self.subscriptions.lock();
            let handle = subscriptions
                .get_mut(topic)
                .and_then(|handles| handles.iter_mut().find(|h| Arc::ptr_eq(&h.state, &state)));
            match handle {
                Some(handle) => {
                    handle.thread = Some(thread);
                    None
                }
                None => Some(thread),
            }
        };
        // Unsubscribed during the replay; the worker finds `Stop` and exits.
        if let Some(thread) = orphan {
            if thread.join().is_err() {
                error!(topic, "subscription worker panicked");
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, callback: &Callback) -> Result<()> {
        let handle = {
            let mut subscriptions = self.subscriptions.lock();
            let Some(handles) = subscriptions.get_mut(topic) else {
                return Ok(());
            };
            let Some(position) = handles.iter().position(|h| h.callback.same(callback)) else {
                return Ok(());
            };
            let handle = handles.remove(position);
            if handles.is_empty() {
                subscriptions.remove(topic);
            }
            handle
        };
        handle.release();
        Ok(())
    }

    fn publish(&self, topic: &str, message: &str) -> Result<()> {
        let mut publisher = self.publisher.lock();
        self.store.append(Keyspace::Topics, topic, message)?;
        self.topics.lock().insert(topic.to_string());

        if let Err(e) = publisher.publish_with_retry(topic, message.as_bytes()) {
            error!(topic, "message persisted but not delivered to the exchange: {e}");
        }
        Ok(())
    }

    fn get_topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    fn search_topics_by_keyword(&self, keyword: &str) -> Result<Vec<String>> {
        let needle = keyword.to_lowercase();
        let mut found = Vec::new();
        for topic in self.get_topics() {
            let history = self.store.read_all(Keyspace::Topics, &topic)?;
            if history.iter().any(|m| contains_ignore_case(m, &needle)) {
                found.push(topic);
            }
        }
        Ok(found)
    }
}

impl Drop for DistributedBroker {
    fn drop(&mut self) {
        let handles: Vec<SubscriptionHandle> = self
            .subscriptions
            .get_mut()
            .drain()
            .flat_map(|(_, handles)| handles)
            .collect();
        for handle in handles {
            handle.release();
        }
        self.publisher.get_mut().close();
    }
}

impl std::fmt::Debug for DistributedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedBroker")
            .field("exchange", &self.exchange)
            .field("topics", &self.topics.lock().len())
            .field("subscribed_topics", &self.subscriptions.lock().len())
            .finish()
    }
}
