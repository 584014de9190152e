//! Resume state: which part files belong to which download.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::shared::errors::FetchError;

pub mod fs;
pub mod memory;

pub use fs::FsCache;
pub use memory::MemoryCache;

/// Identity of the chunked downloader, first segment of every cache key.
pub const DOWNLOADER_IDENTITY: &str = "mediafetch::ChunkedDownloader";

/// Key under which the part paths of one download are stored.
///
/// Two runs share resume state only when the resource id, the worker count
/// and the resource size all match.
pub fn cache_key(resource_id: &str, workers: usize, size: u64) -> String {
    format!("{DOWNLOADER_IDENTITY}.{resource_id}.{workers}.{size}")
}

/// Store mapping a cache key to the ordered list of part file paths.
#[async_trait]
pub trait PartCache: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool, FetchError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<PathBuf>>, FetchError>;

    async fn set(&self, key: &str, parts: &[PathBuf]) -> Result<(), FetchError>;

    /// Remove the entry. Forgetting a missing key is not an error.
    async fn forget(&self, key: &str) -> Result<(), FetchError>;
}
