//! Per-subscription consumer links and workers for the distributed broker.
//!
//! A subscription owns its own connection and channel, a server-named
//! exclusive queue bound under the topic, and one OS thread. The link is
//! opened by `subscribe` itself, so live delivery is in place before it
//! returns; the thread only drains the subscription's inbox, a
//! `crossbeam-channel` receiver. The exchange pushes deliveries into that
//! inbox and `unsubscribe` posts `WorkerEvent::Stop` into the same inbox, so
//! the loop is only ever stopped from inside its own thread.
//!
//! The open link is parked in a shared `LinkState` so the unsubscribing
//! thread can cancel the consumer and close the channel and connection. Each
//! release step is independent: a failure in one does not skip the rest.
//! Setup that fails halfway closes whatever it already opened.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::callback::{Callback, Filter};
use crate::exchange::{
    ConsumerEvent, DeliverySink, ExchangeChannel, ExchangeConnection, ExchangeConnector,
    ExchangeKind, ExchangeResult,
};

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Delivery(Vec<u8>),
    /// The exchange dropped the consumer.
    Cancelled,
    /// Posted by `unsubscribe`.
    Stop,
}

impl From<ConsumerEvent> for WorkerEvent {
    fn from(event: ConsumerEvent) -> Self {
        match event {
            ConsumerEvent::Delivery(body) => WorkerEvent::Delivery(body),
            ConsumerEvent::Cancelled => WorkerEvent::Cancelled,
        }
    }
}

/// Close a channel and its connection, ignoring failures.
pub(crate) fn close_quietly(
    connection: Box<dyn ExchangeConnection>,
    channel: Option<Box<dyn ExchangeChannel>>,
    context: &str,
) {
    if let Some(channel) = channel {
        if let Err(e) = channel.close() {
            debug!(context, "close channel failed: {e}");
        }
    }
    if let Err(e) = connection.close() {
        debug!(context, "close connection failed: {e}");
    }
}

/// Connect, open a channel and declare the durable topic exchange. Nothing
/// stays open when a step fails.
pub(crate) fn connect_declared(
    connector: &dyn ExchangeConnector,
    exchange: &str,
) -> ExchangeResult<(Box<dyn ExchangeConnection>, Box<dyn ExchangeChannel>)> {
    let connection = connector.connect()?;
    let channel = match connection.open_channel() {
        Ok(channel) => channel,
        Err(e) => {
            close_quietly(connection, None, exchange);
            return Err(e);
        }
    };
    if let Err(e) = channel.declare_exchange(exchange, ExchangeKind::Topic, true) {
        close_quietly(connection, Some(channel), exchange);
        return Err(e);
    }
    Ok((connection, channel))
}

/// Exchange resources owned by one subscription.
pub(crate) struct ConsumerLink {
    connection: Box<dyn ExchangeConnection>,
    channel: Box<dyn ExchangeChannel>,
    consumer_tag: String,
    queue: String,
}

impl ConsumerLink {
    /// Open a connection with an exclusive queue whose consumer forwards into
    /// `events`. The queue is not bound yet, see `bind`.
    pub(crate) fn open(
        connector: &dyn ExchangeConnector,
        exchange: &str,
        events: &Sender<WorkerEvent>,
    ) -> ExchangeResult<Self> {
        let (connection, channel) = connect_declared(connector, exchange)?;

        let events = events.clone();
        let sink: DeliverySink = Arc::new(move |event: ConsumerEvent| {
            let _ = events.send(event.into());
        });
        let consumer = channel.declare_exclusive_queue().and_then(|queue| {
            let tag = channel.consume(&queue, sink)?;
            Ok((queue, tag))
        });

        match consumer {
            Ok((queue, consumer_tag)) => Ok(Self {
                connection,
                channel,
                consumer_tag,
                queue,
            }),
            Err(e) => {
                close_quietly(connection, Some(channel), exchange);
                Err(e)
            }
        }
    }

    /// Start routing `topic` into the queue.
    pub(crate) fn bind(&self, exchange: &str, topic: &str) -> ExchangeResult<()> {
        self.channel.bind_queue(&self.queue, exchange, topic)
    }

    /// Cancel, close the channel, close the connection. Best effort.
    pub(crate) fn release(self, topic: &str) {
        if let Err(e) = self.channel.cancel(&self.consumer_tag) {
            debug!(topic, "cancel consumer {} failed: {e}", self.consumer_tag);
        }
        let queue = self.queue;
        close_quietly(self.connection, Some(self.channel), topic);
        debug!(topic, %queue, "released consumer link");
    }
}

pub(crate) enum LinkState {
    Active(ConsumerLink),
    /// Setup failed; nothing to release.
    Failed,
    /// Unsubscribed.
    Released,
}

impl LinkState {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            LinkState::Active(_) => "active",
            LinkState::Failed => "failed",
            LinkState::Released => "released",
        }
    }
}

/// Everything a worker thread needs.
pub(crate) struct WorkerJob {
    pub topic: String,
    pub filter: Filter,
    pub callback: Callback,
    pub state: Arc<Mutex<LinkState>>,
    pub inbox: Receiver<WorkerEvent>,
}

pub(crate) fn spawn(job: WorkerJob) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("sub-{}", job.topic))
        .spawn(move || run(job))
}

fn run(job: WorkerJob) {
    let topic = job.topic.as_str();
    info!(topic, "consumer started");

    for event in job.inbox.iter() {
        match event {
            WorkerEvent::Delivery(body) => {
                // Deliveries queued before an unsubscribe are dropped.
                if matches!(*job.state.lock(), LinkState::Released) {
                    break;
                }
                match String::from_utf8(body) {
                    Ok(text) => {
                        if job.filter.admits(&text) {
                            job.callback.deliver(&text);
                        }
                    }
                    Err(e) => warn!(topic, "dropping non utf-8 payload: {e}"),
                }
            }
            WorkerEvent::Cancelled => {
                if matches!(*job.state.lock(), LinkState::Active(_)) {
                    warn!(topic, "consumer cancelled by the exchange, delivery stopped");
                }
                break;
            }
            WorkerEvent::Stop => break,
        }
    }
    debug!(topic, "consumer stopped");
}
