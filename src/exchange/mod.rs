//! The `exchange` module is the client seam towards a topic-routing message
//! exchange.
//!
//! The distributed broker only needs a handful of primitives: declare a
//! durable topic exchange, publish with a routing key, declare a server-named
//! exclusive queue, bind it, consume from it, cancel the consumer and close
//! channels and connections. Those primitives are expressed as blocking
//! traits so that each subscription worker can own its own connection on its
//! own thread.
//!
//! Implementations:
//! - `memory::MemoryExchange`: an in-process topic exchange.
//! - `amqp::AmqpConnector` (feature `amqp`): a lapin-backed AMQP 0-9-1 client.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;
pub mod routing;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ExchangeDriver, ExchangeSettings};
use crate::utils::Result;

pub use memory::MemoryExchange;

/// Failures reported by an exchange client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("connection refused, {0}")]
    ConnectionRefused(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("channel closed")]
    ChannelClosed,
    #[error("not found, {0}")]
    NotFound(String),
    #[error("protocol error, {0}")]
    Protocol(String),
}

impl ExchangeError {
    /// Whether the failure means the channel or connection went stale, in
    /// which case reopening them may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::ConnectionLost | ExchangeError::ChannelClosed)
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Routing strategy of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Fanout => write!(f, "fanout"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Events pushed by the exchange to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// A routed message body.
    Delivery(Vec<u8>),
    /// The consumer is gone: cancelled, or its channel/connection closed.
    Cancelled,
}

/// Receives consumer events. Invoked from whatever context the client library
/// delivers on, so it must only hand the event off.
pub type DeliverySink = Arc<dyn Fn(ConsumerEvent) + Send + Sync>;

/// Opens connections to an exchange server.
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self) -> ExchangeResult<Box<dyn ExchangeConnection>>;
}

pub trait ExchangeConnection: Send {
    fn open_channel(&self) -> ExchangeResult<Box<dyn ExchangeChannel>>;
    fn close(&self) -> ExchangeResult<()>;
}

pub trait ExchangeChannel: Send {
    fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool)
    -> ExchangeResult<()>;

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> ExchangeResult<()>;

    /// Declare a queue with a server-generated name, owned exclusively by
    /// this channel's connection. Returns the queue name.
    fn declare_exclusive_queue(&self) -> ExchangeResult<String>;

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> ExchangeResult<()>;

    /// Start consuming `queue` without acknowledgements. Returns the consumer
    /// tag used by `cancel`.
    fn consume(&self, queue: &str, sink: DeliverySink) -> ExchangeResult<String>;

    fn cancel(&self, consumer_tag: &str) -> ExchangeResult<()>;

    fn close(&self) -> ExchangeResult<()>;
}

/// Build the connector selected by configuration.
pub fn connector(settings: &ExchangeSettings) -> Result<Arc<dyn ExchangeConnector>> {
    match settings.driver {
        ExchangeDriver::Memory => {
            info!("using the in-process exchange");
            Ok(Arc::new(MemoryExchange::new()))
        }
        #[cfg(feature = "amqp")]
        ExchangeDriver::Amqp => {
            info!(url = %settings.url, "using an amqp exchange");
            Ok(Arc::new(amqp::AmqpConnector::new(settings.url.clone())))
        }
        #[cfg(not(feature = "amqp"))]
        ExchangeDriver::Amqp => Err(crate::utils::Error::InvalidInput(
            "the amqp exchange driver needs the `amqp` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests;
