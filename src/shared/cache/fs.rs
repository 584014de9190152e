use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use super::PartCache;
use crate::shared::errors::FetchError;

const README: &str = "README.txt";
const README_TEXT: &str = "This directory holds mediafetch resume state.\n\
Each file maps one interrupted download to its part files.\n\
It is safe to delete; unfinished downloads then start over.\n";

/// Entries untouched for this long are removed by [`FsCache::gc`].
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache persisted as one small JSON file per key.
#[derive(Debug, Clone)]
pub struct FsCache {
    dir: PathBuf,
}

impl FsCache {
    /// Open the cache rooted at `dir`, creating the directory when needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| FetchError::FileSystem { path: dir.clone(), source })?;
        let readme = dir.join(README);
        if fs::metadata(&readme).await.is_err() {
            fs::write(&readme, README_TEXT).await?;
        }
        debug!(dir = %dir.display(), "Opened part cache");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(hex::encode(digest))
    }

    /// Delete entries last modified more than `max_age` ago, together with
    /// the part files they list.
    ///
    /// Returns how many entries were removed.
    pub async fn gc(&self, max_age: Duration) -> Result<usize, FetchError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|err| FetchError::Cache(err.to_string()))?;
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == README {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(time) => time.into(),
                Err(_) => continue,
            };
            if modified < cutoff {
                remove_listed_parts(&entry.path()).await;
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(error = %err, path = %entry.path().display(), "Can't remove stale cache entry"),
                }
            }
        }
        if removed > 0 {
            info!(removed, "Removed stale cache entries");
        }
        Ok(removed)
    }
}

/// Best effort, an unreadable entry leaves its parts behind.
async fn remove_listed_parts(entry: &Path) {
    let parts: Vec<PathBuf> = match fs::read(entry).await.map(|raw| serde_json::from_slice(&raw)) {
        Ok(Ok(parts)) => parts,
        _ => {
            debug!(entry = %entry.display(), "Stale entry lists no readable parts");
            return;
        }
    };
    for part in parts {
        match fs::remove_file(&part).await {
            Ok(()) => debug!(part = %part.display(), "Removed stale part file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, part = %part.display(), "Can't remove stale part file"),
        }
    }
}

#[async_trait]
impl PartCache for FsCache {
    async fn has(&self, key: &str) -> Result<bool, FetchError> {
        Ok(fs::try_exists(self.entry_path(key)).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<PathBuf>>, FetchError> {
        let raw = match fs::read(self.entry_path(key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let parts: Vec<PathBuf> = serde_json::from_slice(&raw)?;
        Ok(Some(parts))
    }

    async fn set(&self, key: &str, parts: &[PathBuf]) -> Result<(), FetchError> {
        let raw = serde_json::to_vec(parts)?;
        fs::write(self.entry_path(key), raw).await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), FetchError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
