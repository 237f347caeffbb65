//! The `transport` module exposes the broker to remote clients over
//! WebSockets.
//!
//! Every connection becomes a `Client`; JSON `ClientMessage` requests are
//! mapped onto the `Broker` operations and answered with `ServerMessage`
//! frames. Messages delivered on a client's subscriptions are pushed as
//! `ServerMessage::Message`.

pub mod message;
pub mod websocket;

#[cfg(test)]
mod tests;
