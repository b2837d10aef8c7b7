//! Typed session storage.
//!
//! The identity providers persist the current session through the
//! `SessionStore` trait so the backing medium is swappable: an in-memory
//! store for tests and a file store for real runs. Records are stored as
//! pretty JSON, one record per store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::session::SessionRecord;

/// Session file name inside the data directory
const SESSION_FILE: &str = "session.json";

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted session record, if one exists.
    async fn load(&self) -> Result<Option<SessionRecord>, AuthError>;

    /// Persist the session record, replacing any existing one.
    async fn save(&self, record: &SessionRecord) -> Result<(), AuthError>;

    /// Remove the persisted session record. Clearing an empty store is not
    /// an error.
    async fn clear(&self) -> Result<(), AuthError>;
}

/// In-memory store for tests and the no-backend demo mode.
#[derive(Default)]
pub struct MemorySessionStore {
    record: RwLock<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, AuthError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), AuthError> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self.record.write().await = None;
        Ok(())
    }
}

/// File-backed store keeping `session.json` in the app data directory.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join(SESSION_FILE),
        }
    }
}

fn storage_err(err: impl Into<anyhow::Error>) -> AuthError {
    AuthError::Storage(err.into())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).await.map_err(storage_err)?;
        let record: SessionRecord = serde_json::from_str(&contents).map_err(storage_err)?;
        Ok(Some(record))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        let contents = serde_json::to_string_pretty(record).map_err(storage_err)?;
        fs::write(&self.path, contents).await.map_err(storage_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            fs::remove_file(&self.path).await.map_err(storage_err)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tempfile::tempdir;

    fn record() -> SessionRecord {
        SessionRecord::new(
            Session {
                id: "user_1".to_string(),
                email: "a@x.com".to_string(),
                name: None,
                role: Some("user".to_string()),
            },
            Some("token".to_string()),
        )
    }

    #[tokio::test]
    async fn test_memory_store_save_load_clear() {
        let store = MemorySessionStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&record()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.session.email, "a@x.com");

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.save(&record()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.session.id, "user_1");
        assert_eq!(loaded.access_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_file_store_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.clear().await.unwrap();
        store.save(&record()).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record_is_error() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        tokio::fs::write(dir.path().join("session.json"), "not json")
            .await
            .unwrap();

        assert!(matches!(store.load().await, Err(AuthError::Storage(_))));
    }
}
