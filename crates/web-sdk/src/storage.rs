//! Key-value storage capability — the tracker's only shared state.
//!
//! Browsers hand scripts two string-keyed stores per origin: a durable one
//! that survives restarts and a session one scoped to the tab. Both are
//! modelled by [`KeyValueStore`] so hosts choose the backing and tests can
//! inject failures.
//!
//! No operation here is transactional. A read-append-write sequence from two
//! writers on the same key can interleave and drop the earlier append.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::form_urlencoded;

use utm_core::{TrackerError, TrackerResult};

/// String-keyed, string-valued store with browser storage semantics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> TrackerResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> TrackerResult<()>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> TrackerResult<()>;
}

/// The two storage scopes a page sees. Both hold the snapshot under the same key.
#[derive(Clone)]
pub struct TrackerStores {
    pub durable: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
}

impl TrackerStores {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, session }
    }

    /// Fresh, unbounded in-memory stores for both scopes.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }
}

/// In-memory store. An optional byte quota (keys plus values) makes `set`
/// fail the way a full browser store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key() != key)
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> TrackerResult<()> {
        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_excluding(key) + key.len() + value.len();
            if needed > quota {
                return Err(TrackerError::storage(
                    key,
                    format!("quota exceeded ({needed} > {quota} bytes)"),
                ));
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> TrackerResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed store: one directory per scope, one file per key. Writes land
/// in a temp file that is renamed over the key's file, so a reader sees the
/// old value or the new one and writers only collide on a key they share,
/// the way tabs on one origin do.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let name: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::storage(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> TrackerResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TrackerError::storage(key, e))?;
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| TrackerError::storage(key, e))?;
        tmp.write_all(value.as_bytes())
            .map_err(|e| TrackerError::storage(key, e))?;
        tmp.persist(self.key_path(key))
            .map_err(|e| TrackerError::storage(key, e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> TrackerResult<()> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrackerError::storage(key, e)),
        }
    }
}

/// Read and decode a JSON value. Absent keys, unreadable stores and corrupt
/// values all come back as `None`; the latter two are logged.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "storage read failed, treating as absent");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(source) => {
            let err = TrackerError::DataCorruption {
                key: key.to_string(),
                source,
            };
            warn!(key, error = %err, "discarding corrupt stored value");
            None
        }
    }
}

/// Read a JSON array, falling back to an empty log.
pub fn read_log<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    read_json(store, key).unwrap_or_default()
}

pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> TrackerResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Read-append-write on a JSON array. Returns the new log length.
pub fn append_to_log<T: Serialize + DeserializeOwned + Clone>(
    store: &dyn KeyValueStore,
    key: &str,
    record: &T,
) -> TrackerResult<usize> {
    let mut log: Vec<T> = read_log(store, key);
    log.push(record.clone());
    write_json(store, key, &log)?;
    debug!(key, len = log.len(), "appended to log");
    Ok(log.len())
}
