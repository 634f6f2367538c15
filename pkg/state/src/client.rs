use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;
use crate::watch::{ChangeFeed, EventType};
use pkg_constants::state::CHANGE_FEED_CAPACITY;

/// Persistent key-value store backed by SlateDB on a local filesystem.
/// Every mutation is also published on `changes`.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    pub changes: ChangeFeed,
}

fn backend(op: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("SlateDB {} failed: {}", op, e))
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        info!("Opening SlateDB state store at {}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!("Failed to create data directory {}: {}", path, e))
        })?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path).map_err(|e| backend("object store init", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| backend("open", e))?;
        Ok(Self {
            db,
            changes: ChangeFeed::new(CHANGE_FEED_CAPACITY),
        })
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| backend("put", e))?;
        self.changes.publish(EventType::Put, key, Some(value));
        Ok(())
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(backend("get", e)),
        }
    }

    /// Delete a key from the store.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| backend("delete", e))?;
        self.changes.publish(EventType::Delete, key, None);
        Ok(())
    }

    /// List all key-value pairs whose keys start with `prefix`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| backend("scan_prefix", e))?;

        while let Some(kv) = iter.next().await.map_err(|e| backend("scan", e))? {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> Result<(), StoreError> {
        info!("Closing SlateDB state store");
        self.db.close().await.map_err(|e| backend("close", e))
    }
}
