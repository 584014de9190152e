use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PartCache;
use crate::shared::errors::FetchError;

/// Process local cache. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<PathBuf>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartCache for MemoryCache {
    async fn has(&self, key: &str) -> Result<bool, FetchError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<PathBuf>>, FetchError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, parts: &[PathBuf]) -> Result<(), FetchError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), parts.to_vec());
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), FetchError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
