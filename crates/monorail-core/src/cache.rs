//! Task cache - fingerprint-keyed verdict store
//!
//! Storage is a capability: the scheduler only ever calls `read` and
//! `write`, so a caller can swap the backend without touching scheduling.
//! The default store is sled under `.monorail/cache` with JSON-encoded
//! values; writes are per-key upserts, last write wins.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Verdict recorded for one (package, script) execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Success,
    Error,
    Skipped,
}

/// Cache entry metadata, keyed externally by fingerprint digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub package: String,
    pub script: String,
    pub timestamp: u64,
    pub status: ScriptStatus,
}

impl CacheEntry {
    pub fn new(
        package: impl Into<String>,
        script: impl Into<String>,
        status: ScriptStatus,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            package: package.into(),
            script: script.into(),
            timestamp,
            status,
        }
    }
}

/// Storage capability for cache verdicts
pub trait CacheStore: Send + Sync {
    fn read(&self, digest: &str) -> Result<Option<CacheEntry>>;
    fn write(&self, digest: &str, entry: &CacheEntry) -> Result<()>;
}

/// Durable local store backed by sled
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = root.as_ref().join(".monorail").join("cache");
        std::fs::create_dir_all(&cache_dir)?;

        let db = sled::open(&cache_dir).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Self { db })
    }
}

impl CacheStore for SledStore {
    fn read(&self, digest: &str) -> Result<Option<CacheEntry>> {
        match self
            .db
            .get(digest.as_bytes())
            .map_err(|e| Error::Cache(e.to_string()))?
        {
            Some(data) => {
                let entry = serde_json::from_slice(&data)
                    .map_err(|e| Error::Cache(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn write(&self, digest: &str, entry: &CacheEntry) -> Result<()> {
        let data = serde_json::to_vec(entry).map_err(|e| Error::Cache(e.to_string()))?;
        self.db
            .insert(digest.as_bytes(), data)
            .map_err(|e| Error::Cache(e.to_string()))?;
        self.db.flush().map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

/// In-memory store, a drop-in substitute where durability is not wanted
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore for MemoryStore {
    fn read(&self, digest: &str) -> Result<Option<CacheEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory store poisoned".into()))?;
        Ok(entries.get(digest).cloned())
    }

    fn write(&self, digest: &str, entry: &CacheEntry) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory store poisoned".into()))?;
        entries.insert(digest.to_string(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sled_round_trip_preserves_the_entry() {
        let tmp = TempDir::new().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();

        let entry = CacheEntry::new("app", "build", ScriptStatus::Success);
        store.write("digest-1", &entry).unwrap();

        let read = store.read("digest-1").unwrap().unwrap();
        assert_eq!(read, entry);
        assert!(store.read("digest-2").unwrap().is_none());
    }

    #[test]
    fn writes_are_upserts() {
        let tmp = TempDir::new().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();

        store
            .write("d", &CacheEntry::new("app", "build", ScriptStatus::Error))
            .unwrap();
        store
            .write("d", &CacheEntry::new("app", "build", ScriptStatus::Success))
            .unwrap();

        let read = store.read("d").unwrap().unwrap();
        assert_eq!(read.status, ScriptStatus::Success);
    }

    #[test]
    fn memory_store_honours_the_same_contract() {
        let store = MemoryStore::default();
        let entry = CacheEntry::new("lib", "test", ScriptStatus::Skipped);
        store.write("k", &entry).unwrap();
        assert_eq!(store.read("k").unwrap().unwrap(), entry);
    }
}
