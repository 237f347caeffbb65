//! In-process topic exchange.
//!
//! `MemoryExchange` behaves like a single exchange server shared by every
//! connection opened through it: exchanges with bindings, server-named
//! exclusive queues that disappear with their owning connection, and one
//! consumer per queue. Messages routed to a queue with no consumer wait in
//! the queue's backlog.
//!
//! Sinks are invoked while the server lock is held so deliveries keep publish
//! order. A sink must only hand the event off and never call back into the
//! exchange.
//!
//! The server can refuse new connections (`set_available(false)`) and drop
//! every live connection (`sever_connections`) to exercise reconnect and
//! setup-failure paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::routing;
use super::{
    ConsumerEvent, DeliverySink, ExchangeChannel, ExchangeConnection, ExchangeConnector,
    ExchangeError, ExchangeKind, ExchangeResult,
};

#[derive(Clone, Default)]
pub struct MemoryExchange {
    state: Arc<Mutex<ServerState>>,
}

#[derive(Default)]
struct ServerState {
    refuse_connections: bool,
    next_id: u64,
    connections: HashSet<u64>,
    /// Open channel id -> owning connection id.
    channels: HashMap<u64, u64>,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

struct Binding {
    queue: String,
    key: String,
}

struct Queue {
    owner: u64,
    backlog: VecDeque<Vec<u8>>,
    consumer: Option<Consumer>,
}

struct Consumer {
    tag: String,
    channel: u64,
    sink: DeliverySink,
}

impl ServerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_channel(&self, connection: u64, channel: u64) -> ExchangeResult<()> {
        if !self.connections.contains(&connection) {
            return Err(ExchangeError::ConnectionLost);
        }
        if !self.channels.contains_key(&channel) {
            return Err(ExchangeError::ChannelClosed);
        }
        Ok(())
    }

    /// Drop a connection with its channels and exclusive queues, telling
    /// their consumers they are gone.
    fn teardown_connection(&mut self, connection: u64) {
        self.connections.remove(&connection);
        self.channels.retain(|_, owner| *owner != connection);

        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == connection)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &owned {
            if let Some(queue) = self.queues.remove(name) {
                if let Some(consumer) = queue.consumer {
                    (consumer.sink)(ConsumerEvent::Cancelled);
                }
            }
        }

        for exchange in self.exchanges.values_mut() {
            exchange
                .bindings
                .retain(|binding| !owned.contains(&binding.queue));
        }
        debug!(connection, queues = owned.len(), "memory exchange connection closed");
    }

    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> ExchangeResult<()> {
        let Some(target) = self.exchanges.get(exchange) else {
            return Err(ExchangeError::NotFound(format!("exchange '{exchange}'")));
        };

        let mut queues: Vec<String> = Vec::new();
        for binding in &target.bindings {
            let routed = match target.kind {
                ExchangeKind::Direct => binding.key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => routing::matches(&binding.key, routing_key),
            };
            if routed && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }

        trace!(exchange, routing_key, queues = queues.len(), "routing message");

        for name in queues {
            if let Some(queue) = self.queues.get_mut(&name) {
                match &queue.consumer {
                    Some(consumer) => (consumer.sink)(ConsumerEvent::Delivery(payload.to_vec())),
                    None => queue.backlog.push_back(payload.to_vec()),
                }
            }
        }
        Ok(())
    }
}

impl MemoryExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `false`, every new `connect` is refused. Live connections are
    /// left alone.
    pub fn set_available(&self, available: bool) {
        self.state.lock().refuse_connections = !available;
    }

    /// Drop every live connection as if the server restarted.
    pub fn sever_connections(&self) {
        let mut state = self.state.lock();
        let live: Vec<u64> = state.connections.iter().copied().collect();
        for connection in live {
            state.teardown_connection(connection);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn queue_count(&self) -> usize {
        self.state.lock().queues.len()
    }

    /// Number of queues currently bound under `routing_key` on `exchange`.
    pub fn binding_count(&self, exchange: &str, routing_key: &str) -> usize {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map_or(0, |e| e.bindings.iter().filter(|b| b.key == routing_key).count())
    }
}

impl fmt::Debug for MemoryExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryExchange")
            .field("connections", &state.connections.len())
            .field("channels", &state.channels.len())
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .finish()
    }
}

impl ExchangeConnector for MemoryExchange {
    fn connect(&self) -> ExchangeResult<Box<dyn ExchangeConnection>> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(ExchangeError::ConnectionRefused(
                "memory exchange is unavailable".to_string(),
            ));
        }
        let id = state.allocate_id();
        state.connections.insert(id);
        Ok(Box::new(MemoryConnection {
            server: self.clone(),
            id,
        }))
    }
}

struct MemoryConnection {
    server: MemoryExchange,
    id: u64,
}

impl ExchangeConnection for MemoryConnection {
    fn open_channel(&self) -> ExchangeResult<Box<dyn ExchangeChannel>> {
        let mut state = self.server.state.lock();
        if !state.connections.contains(&self.id) {
            return Err(ExchangeError::ConnectionLost);
        }
        let id = state.allocate_id();
        state.channels.insert(id, self.id);
        Ok(Box::new(MemoryChannel {
            server: self.server.clone(),
            id,
            connection: self.id,
        }))
    }

    fn close(&self) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        if !state.connections.contains(&self.id) {
            return Err(ExchangeError::ConnectionLost);
        }
        state.teardown_connection(self.id);
        Ok(())
    }
}

struct MemoryChannel {
    server: MemoryExchange,
    id: u64,
    connection: u64,
}

impl ExchangeChannel for MemoryChannel {
    fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _durable: bool,
    ) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(ExchangeError::Protocol(format!(
                "exchange '{name}' already declared as {}",
                existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        state.route(exchange, routing_key, payload)
    }

    fn declare_exclusive_queue(&self) -> ExchangeResult<String> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        state.queues.insert(
            name.clone(),
            Queue {
                owner: self.connection,
                backlog: VecDeque::new(),
                consumer: None,
            },
        );
        Ok(name)
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        if !state.queues.contains_key(queue) {
            return Err(ExchangeError::NotFound(format!("queue '{queue}'")));
        }
        let Some(target) = state.exchanges.get_mut(exchange) else {
            return Err(ExchangeError::NotFound(format!("exchange '{exchange}'")));
        };
        let exists = target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.key == routing_key);
        if !exists {
            target.bindings.push(Binding {
                queue: queue.to_string(),
                key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    fn consume(&self, queue: &str, sink: DeliverySink) -> ExchangeResult<String> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        let Some(target) = state.queues.get_mut(queue) else {
            return Err(ExchangeError::NotFound(format!("queue '{queue}'")));
        };
        if target.owner != self.connection {
            return Err(ExchangeError::Protocol(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }
        if target.consumer.is_some() {
            return Err(ExchangeError::Protocol(format!(
                "queue '{queue}' already has a consumer"
            )));
        }

        let tag = format!("ctag-{}", Uuid::new_v4().simple());
        for body in target.backlog.drain(..) {
            sink(ConsumerEvent::Delivery(body));
        }
        target.consumer = Some(Consumer {
            tag: tag.clone(),
            channel: self.id,
            sink,
        });
        Ok(tag)
    }

    fn cancel(&self, consumer_tag: &str) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        let consumer = state.queues.values_mut().find_map(|queue| {
            if queue.consumer.as_ref().is_some_and(|c| c.tag == consumer_tag) {
                queue.consumer.take()
            } else {
                None
            }
        });
        match consumer {
            Some(consumer) => {
                (consumer.sink)(ConsumerEvent::Cancelled);
                Ok(())
            }
            None => Err(ExchangeError::NotFound(format!("consumer '{consumer_tag}'"))),
        }
    }

    fn close(&self) -> ExchangeResult<()> {
        let mut state = self.server.state.lock();
        state.check_channel(self.connection, self.id)?;
        state.channels.remove(&self.id);
        for queue in state.queues.values_mut() {
            if queue.consumer.as_ref().is_some_and(|c| c.channel == self.id) {
                if let Some(consumer) = queue.consumer.take() {
                    (consumer.sink)(ConsumerEvent::Cancelled);
                }
            }
        }
        Ok(())
    }
}
