//! Local key-value persistence.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Named record collections in the local store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Documents,
    Window,
    Meta,
    Config,
    Counters,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Documents,
        Collection::Window,
        Collection::Meta,
        Collection::Config,
        Collection::Counters,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Documents => "documents",
            Collection::Window => "window",
            Collection::Meta => "meta",
            Collection::Config => "config",
            Collection::Counters => "counters",
        }
    }
}

/// Durable record storage. Writes for one key must be serializable.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<()>;

    /// All records of a collection, ordered by key.
    async fn list(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>>;

    async fn delete(&self, collection: Collection, key: &str) -> Result<()>;
}

/// In-memory store with fault injection.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Collection, BTreeMap<String, Vec<u8>>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: Mutex<Vec<(Collection, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `set`/`delete` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every `get`/`list` fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Successful `set` calls in order.
    pub fn write_log(&self) -> Vec<(Collection, String)> {
        self.writes.lock().clone()
    }

    pub fn clear_write_log(&self) {
        self.writes.lock().clear();
    }

    /// Seed a raw record, bypassing fault injection.
    pub fn insert_raw(&self, collection: Collection, key: &str, value: impl Into<Vec<u8>>) {
        self.records
            .write()
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get_raw(&self, collection: Collection, key: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .get(&collection)
            .and_then(|records| records.get(key).cloned())
    }

    pub fn keys(&self, collection: Collection) -> Vec<String> {
        self.records
            .read()
            .get(&collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SessionError::StorageError("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SessionError::StorageError("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        Ok(self.get_raw(collection, key))
    }

    async fn set(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_write()?;
        self.insert_raw(collection, key, value);
        self.writes.lock().push((collection, key.to_string()));
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>> {
        self.check_read()?;
        Ok(self
            .records
            .read()
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        self.check_write()?;
        if let Some(records) = self.records.write().get_mut(&collection) {
            records.remove(key);
        }
        Ok(())
    }
}

/// Store keeping one JSON file per record under `root/<collection>/`.
pub struct DirStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: Collection, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::StorageError(format!(
                "invalid record key {key:?}"
            )));
        }
        Ok(self
            .root
            .join(collection.name())
            .join(format!("{key}.json")))
    }
}

fn storage_error(err: std::io::Error) -> SessionError {
    SessionError::StorageError(err.to_string())
}

#[async_trait]
impl LocalStore for DirStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(collection, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn set(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.record_path(collection, key)?;
        let _guard = self.write_lock.lock().await;
        let dir = self.root.join(collection.name());
        tokio::fs::create_dir_all(&dir).await.map_err(storage_error)?;

        // Write to a sibling and rename so readers never see a torn record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &value).await.map_err(storage_error)?;
        tokio::fs::rename(&tmp, &path).await.map_err(storage_error)?;
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>> {
        let dir = self.root.join(collection.name());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await.map_err(storage_error)?;
            records.push((key.to_string(), bytes));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let path = self.record_path(collection, key)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}
