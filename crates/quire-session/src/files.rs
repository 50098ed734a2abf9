//! File collaborator for file-backed documents.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait FileIo: Send + Sync + 'static {
    async fn read(&self, path: &Path) -> Result<String>;

    async fn write(&self, path: &Path, text: &str) -> Result<()>;

    async fn exists(&self, path: &Path) -> bool;

    async fn last_modified(&self, path: &Path) -> Result<DateTime<Utc>>;
}

/// Real filesystem access through `tokio::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsFiles;

#[async_trait]
impl FileIo for FsFiles {
    async fn read(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::file(path, e))
    }

    async fn write(&self, path: &Path, text: &str) -> Result<()> {
        tokio::fs::write(path, text)
            .await
            .map_err(|e| SessionError::file(path, e))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn last_modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| SessionError::file(path, e))?;
        let modified = meta.modified().map_err(|e| SessionError::file(path, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

/// In-memory files with per-path permission denial.
#[derive(Default)]
pub struct MemoryFiles {
    files: RwLock<HashMap<PathBuf, (String, DateTime<Utc>)>>,
    denied: RwLock<HashSet<PathBuf>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files
            .write()
            .insert(path.into(), (text.into(), Utc::now()));
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .read()
            .get(path.as_ref())
            .map(|(text, _)| text.clone())
    }

    pub fn deny(&self, path: impl Into<PathBuf>) {
        self.denied.write().insert(path.into());
    }

    pub fn allow(&self, path: impl AsRef<Path>) {
        self.denied.write().remove(path.as_ref());
    }

    fn check(&self, path: &Path) -> Result<()> {
        if self.denied.read().contains(path) {
            return Err(SessionError::file(path, "permission denied"));
        }
        Ok(())
    }
}

#[async_trait]
impl FileIo for MemoryFiles {
    async fn read(&self, path: &Path) -> Result<String> {
        self.check(path)?;
        self.contents(path)
            .ok_or_else(|| SessionError::file(path, "no such file"))
    }

    async fn write(&self, path: &Path, text: &str) -> Result<()> {
        self.check(path)?;
        self.put(path, text);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    async fn last_modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        self.check(path)?;
        self.files
            .read()
            .get(path)
            .map(|(_, modified)| *modified)
            .ok_or_else(|| SessionError::file(path, "no such file"))
    }
}
