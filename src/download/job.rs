use derive_getters::Getters;
use reqwest::header::HeaderMap;
use url::Url;

use crate::shared::errors::FetchError;
use crate::shared::network::headers::{default_headers, merge_headers};

pub const DEFAULT_WORKERS: usize = 32;

/// What to download and how many connections to use.
#[derive(Debug, Clone, Getters)]
pub struct DownloadJob {
    url: Url,
    /// Stable identity used for resumption; the url may carry expiring tokens.
    resource_id: String,
    workers: usize,
    /// Caller headers, overlaid on the defaults by [`DownloadJob::headers`].
    #[getter(skip)]
    extra_headers: HeaderMap,
}

impl DownloadJob {
    pub fn new(url: Url, resource_id: impl Into<String>) -> Self {
        Self {
            url,
            resource_id: resource_id.into(),
            workers: DEFAULT_WORKERS,
            extra_headers: HeaderMap::new(),
        }
    }

    pub fn set_workers(mut self, workers: i64) -> Result<Self, FetchError> {
        if workers <= 0 {
            return Err(FetchError::InvalidWorkerCount(workers));
        }
        self.workers = usize::try_from(workers).map_err(|_| FetchError::InvalidWorkerCount(workers))?;
        Ok(self)
    }

    /// Add caller headers. Later calls override earlier ones of the same name.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.extra_headers = merge_headers(&self.extra_headers, &headers);
        self
    }

    /// Default headers overlaid with the caller's.
    pub fn headers(&self) -> HeaderMap {
        merge_headers(&default_headers(), &self.extra_headers)
    }
}
