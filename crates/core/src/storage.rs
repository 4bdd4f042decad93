// Key/value persistence for visitor ids and page-view history
//
// The pipeline only needs get/set/remove of a string by key. Implementations:
// - In-memory storage for tests and short-lived processes
// - File-backed storage that survives restarts
// - A no-op storage used when nothing else is available

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AnalyticsError, Result};

/// Storage key under which the visitor id is persisted
pub const VISITOR_ID_KEY: &str = "visitorId";

// ============================================================================
// Storage trait
// ============================================================================

/// Trait for persisting small string values by key
///
/// Implementations may fail; callers in the pipeline log and recover rather
/// than surfacing storage failures to `send_event`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value (no error when absent)
    async fn remove_item(&self, key: &str) -> Result<()>;
}

// ============================================================================
// NullStorage - used when persistence is unavailable
// ============================================================================

/// Storage that remembers nothing
#[derive(Debug, Clone, Default)]
pub struct NullStorage;

#[async_trait]
impl Storage for NullStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// InMemoryStorage
// ============================================================================

/// In-memory storage
///
/// Cloning shares the underlying map, which lets tests inspect what the
/// pipeline wrote.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStorage {
    /// Create an empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a value (useful for testing)
    pub async fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.items.write().await.insert(key.into(), value.into());
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Check if nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

// ============================================================================
// FileStorage - JSON object on disk
// ============================================================================

/// File-backed storage
///
/// All keys live in one JSON object. Every write rewrites the whole file,
/// which is fine for the handful of keys the pipeline uses.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl FileStorage {
    /// Create a storage backed by `path` (created on first write)
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(AnalyticsError::storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_all(&self, items: &HashMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec(items)?;
        tokio::fs::write(&self.path, bytes).await.map_err(|e| {
            AnalyticsError::storage(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value.to_string());
        self.write_all(&items).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut items = self.read_all().await?;
        if items.remove(key).is_some() {
            self.write_all(&items).await?;
        }
        Ok(())
    }
}
