//! The `error` module defines the error type shared by every `logcast` module.
//!
//! Only the Durable Log Store and thread spawning produce errors that reach
//! broker callers. Exchange failures are logged and absorbed by the broker
//! (see `broker::distributed`), so `Exchange` only surfaces from setup paths
//! such as opening the publish connection.

use config::ConfigError;
use thiserror::Error;

use crate::exchange::ExchangeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error, {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error, {0}")]
    Sled(#[from] sled::Error),
    #[error("json error, {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error, {0}")]
    Config(#[from] ConfigError),
    #[error("exchange error, {0}")]
    Exchange(#[from] ExchangeError),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("failed to spawn subscription worker, {0}")]
    Spawn(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
