//! Durable key-value store boundary
//!
//! The orchestrator persists a small amount of progress state (per-cluster
//! last-success timestamps) through this interface so it survives
//! restarts. The daemon defaults to the file-backed implementation; tests
//! use the in-memory one.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Minimal durable store contract: string keys, string values.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryDatabase {
    entries: DashMap<String, String>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a JSON snapshot file. The full map is rewritten on
/// every put; the state is a handful of keys, so snapshotting beats a log.
pub struct FileDatabase {
    path: PathBuf,
    entries: DashMap<String, String>,
    /// Serializes snapshot writes so concurrent puts cannot interleave.
    write_lock: Mutex<()>,
}

impl FileDatabase {
    /// Open (or create) the store at `path`, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let entries = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let snapshot: BTreeMap<String, String> = serde_json::from_str(&raw)
                    .map_err(|e| {
                        Error::Store(format!("corrupt snapshot {}: {}", path.display(), e))
                    })?;
                for (key, value) in snapshot {
                    entries.insert(key, value);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Store(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        Ok(Self {
            path,
            entries,
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::Store(format!("cannot encode snapshot: {}", e)))?;

        // Write-then-rename keeps the snapshot intact across a crash.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| Error::Store(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Store(format!("cannot replace {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl Database for FileDatabase {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_database_round_trip() {
        let db = MemoryDatabase::new();
        assert_eq!(db.get("missing").await.unwrap(), None);
        db.put("cluster/production/success", "2026-08-25T00:00:00Z")
            .await
            .unwrap();
        assert_eq!(
            db.get("cluster/production/success").await.unwrap().as_deref(),
            Some("2026-08-25T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let db = FileDatabase::open(&path).unwrap();
        assert_eq!(db.get("cluster/production/last_success").await.unwrap(), None);
        db.put("cluster/production/last_success", "2026-08-25T00:00:00Z")
            .await
            .unwrap();
        db.put("cluster/staging/last_success", "2026-08-24T00:00:00Z")
            .await
            .unwrap();
        drop(db);

        let reopened = FileDatabase::open(&path).unwrap();
        assert_eq!(
            reopened
                .get("cluster/production/last_success")
                .await
                .unwrap()
                .as_deref(),
            Some("2026-08-25T00:00:00Z")
        );
        assert_eq!(
            reopened
                .get("cluster/staging/last_success")
                .await
                .unwrap()
                .as_deref(),
            Some("2026-08-24T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn file_database_creates_missing_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let db = FileDatabase::open(&path).unwrap();
        db.put("k", "v").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_database_rejects_corrupt_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileDatabase::open(&path), Err(Error::Store(_))));
    }
}
