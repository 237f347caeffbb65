//! The `client` module defines the broker-side view of a connected
//! WebSocket client.

pub mod pubsub_client;
pub use pubsub_client::Client;

#[cfg(test)]
mod tests;
