//! Log store backed by `sled`.
//!
//! Every `(keyspace, name)` pair gets its own tree, named
//! `<keyspace>/<name>`. Keys come from `Db::generate_id`, written big-endian,
//! so a tree iterates in append order. Values are JSON `StoredLine` records.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use super::{Keyspace, LogStore, validate_name};
use crate::utils::Result;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredLine {
    pub line: String,
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct SledLogStore {
    db: Db,
}

impl SledLogStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self, keyspace: Keyspace, name: &str) -> Result<Tree> {
        validate_name(name)?;
        Ok(self.db.open_tree(tree_name(keyspace, name))?)
    }

    fn insert_line(&self, tree: &Tree, line: &str) -> Result<()> {
        let record = StoredLine {
            line: line.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let key = self.db.generate_id()?.to_be_bytes();
        tree.insert(key, serde_json::to_vec(&record)?)?;
        Ok(())
    }
}

fn tree_name(keyspace: Keyspace, name: &str) -> String {
    format!("{}/{}", keyspace.as_str(), name)
}

impl LogStore for SledLogStore {
    fn append(&self, keyspace: Keyspace, name: &str, line: &str) -> Result<()> {
        let tree = self.tree(keyspace, name)?;
        self.insert_line(&tree, line)?;
        self.db.flush()?;
        Ok(())
    }

    fn read_all(&self, keyspace: Keyspace, name: &str) -> Result<Vec<String>> {
        validate_name(name)?;
        let tree_name = tree_name(keyspace, name);
        // Avoid creating empty trees just by looking.
        if !self
            .db
            .tree_names()
            .iter()
            .any(|existing| &existing[..] == tree_name.as_bytes())
        {
            return Ok(Vec::new());
        }
        let tree = self.db.open_tree(tree_name)?;
        let mut lines = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, value) = entry?;
            let record: StoredLine = serde_json::from_slice(&value)?;
            lines.push(record.line);
        }
        Ok(lines)
    }

    fn list_namespaces(&self, keyspace: Keyspace) -> Result<Vec<String>> {
        let prefix = format!("{}/", keyspace.as_str());
        let mut names = Vec::new();
        for raw in self.db.tree_names() {
            let Ok(full) = std::str::from_utf8(&raw) else {
                continue;
            };
            let Some(name) = full.strip_prefix(&prefix) else {
                continue;
            };
            if !self.db.open_tree(&raw)?.is_empty() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn replace(&self, keyspace: Keyspace, name: &str, lines: &[String]) -> Result<()> {
        let tree = self.tree(keyspace, name)?;
        tree.clear()?;
        for line in lines {
            self.insert_line(&tree, line)?;
        }
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLogStore")
            .field("db", &"sled::Db")
            .finish()
    }
}
