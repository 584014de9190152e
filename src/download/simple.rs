use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};
use url::Url;

use crate::shared::errors::FetchError;
use crate::shared::network::RangeTransport;
use crate::shared::progress::{DownloadIndicator, ProgressIndicator};

/// Single connection download, for servers that ignore range requests.
pub struct SimpleDownloader {
    url: Url,
    headers: HeaderMap,
    transport: Arc<dyn RangeTransport>,
    show_progress: bool,
}

impl SimpleDownloader {
    pub fn new(url: Url, headers: HeaderMap, transport: Arc<dyn RangeTransport>) -> Self {
        Self { url, headers, transport, show_progress: true }
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Stream the resource into a temporary file beside `path`, then move it in place.
    #[instrument(name = "simple_save_to", skip_all, fields(url = %self.url, output = %path.as_ref().display()))]
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<PathBuf, FetchError> {
        let output = path.as_ref().to_path_buf();
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = tempfile::Builder::new()
            .prefix(".mediafetch")
            .tempfile_in(&dir)
            .map_err(|source| FetchError::FileSystem { path: dir.clone(), source })?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let remote = self.transport.fetch(&self.url, &self.headers, None).await?;
        let mut indicator = DownloadIndicator::new(ProgressIndicator::new(self.show_progress), remote.content_length);
        let mut stream = remote.stream;
        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            indicator.progress(chunk.len() as u64);
            indicator.display("(1 worker)");
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        indicator.finish("(1 worker)");

        if let Some(expected) = remote.content_length {
            if received != expected {
                return Err(FetchError::UnexpectedEof { received, expected });
            }
        }

        temp.persist(&output)
            .map_err(|err| FetchError::FileSystem { path: output.clone(), source: err.error })?;
        info!(received, "Saved resource with a single connection");
        Ok(output)
    }
}
