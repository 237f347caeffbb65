//! The `persistence` module is the Durable Log Store.
//!
//! Each keyspace (`Topics`, `Subscriptions`) maps a name to an append-only
//! list of text lines: a topic's message history, or a user's subscribed
//! topics. Brokers rebuild their topic registry from it at construction, so
//! everything published survives a restart.
//!
//! Two backends are provided:
//! - `sled_store::SledLogStore`: an embedded `sled` database, one tree per name.
//! - `file_store::FileLogStore`: one flat text file per name.

pub mod file_store;
pub mod sled_store;
pub mod subscriptions;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{StorageBackend, StorageSettings};
use crate::utils::{Error, Result};

pub use file_store::FileLogStore;
pub use sled_store::SledLogStore;
pub use subscriptions::SubscriptionBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// Topic name -> published messages.
    Topics,
    /// User name -> subscribed topics.
    Subscriptions,
}

impl Keyspace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyspace::Topics => "topics",
            Keyspace::Subscriptions => "subscriptions",
        }
    }
}

pub trait LogStore: Send + Sync + fmt::Debug {
    /// Append one line under `name`, creating it on first use.
    fn append(&self, keyspace: Keyspace, name: &str, line: &str) -> Result<()>;

    /// Every line appended under `name`, oldest first. Empty when absent.
    fn read_all(&self, keyspace: Keyspace, name: &str) -> Result<Vec<String>>;

    /// Names holding at least one line.
    fn list_namespaces(&self, keyspace: Keyspace) -> Result<Vec<String>>;

    /// Overwrite the lines stored under `name`.
    fn replace(&self, keyspace: Keyspace, name: &str, lines: &[String]) -> Result<()>;
}

/// Names double as file and tree names, so they may not be empty, contain a
/// path separator or traverse upwards.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.contains(['/', '\\', '\0'])
        || name == "."
        || name.contains("..");
    if invalid {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Open the store selected by configuration.
pub fn open_store(settings: &StorageSettings) -> Result<Arc<dyn LogStore>> {
    let root = Path::new(&settings.path);
    let store: Arc<dyn LogStore> = match settings.backend {
        StorageBackend::Sled => Arc::new(SledLogStore::open(root.join("db"))?),
        StorageBackend::Files => Arc::new(FileLogStore::new(root)),
    };
    tracing::info!(backend = ?settings.backend, path = %settings.path, "opened log store");
    Ok(store)
}
