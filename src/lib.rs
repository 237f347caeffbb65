//! # logcast
//!
//! `logcast` is a topic-based publish/subscribe broker with durable per-topic
//! message logs and per-user subscription lists. Subscribers get the stored
//! history of a topic replayed on subscribe, then every new message matching
//! their optional keyword filter.
//!
//! ## Core Modules
//!
//! - `broker`: the `Broker` contract and its two backends, in-process
//!   (`LocalBroker`) and exchange-mediated (`DistributedBroker`).
//! - `exchange`: client seam towards a topic exchange, with an in-process
//!   exchange and an optional AMQP adapter.
//! - `persistence`: the Durable Log Store (sled or flat files) and per-user
//!   subscription lists.
//! - `session`: a user's session (publish as user, save/restore subscriptions).
//! - `client` / `transport`: WebSocket gateway in front of a broker.
//! - `config`: settings loading.
//! - `utils`: error type and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod exchange;
pub mod persistence;
pub mod session;
pub mod transport;
pub mod utils;
