use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::job::DownloadJob;
use super::merge::merge_parts;
use super::options::DownloadOptions;
use super::partition::{ByteRange, partition};
use super::status::{TrackerControl, WorkerOutcome};
use super::tracker::Tracker;
use super::worker::Worker;
use crate::shared::cache::{PartCache, cache_key};
use crate::shared::errors::FetchError;
use crate::shared::lifecycle::ShutdownHooks;
use crate::shared::network::RangeTransport;
use crate::shared::progress::{DownloadIndicator, ProgressIndicator};

/// Probe range sent during validation, a server honouring it returns 11 bytes.
const PROBE_RANGE: ByteRange = ByteRange { start: 10, end: 20 };

/// Chunked downloader for a job that was not validated yet.
pub struct Downloader {
    job: DownloadJob,
    transport: Arc<dyn RangeTransport>,
    cache: Arc<dyn PartCache>,
    hooks: ShutdownHooks,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(
        job: DownloadJob,
        transport: Arc<dyn RangeTransport>,
        cache: Arc<dyn PartCache>,
        hooks: ShutdownHooks,
    ) -> Self {
        Self { job, transport, cache, hooks, options: DownloadOptions::default() }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_workers(mut self, workers: i64) -> Result<Self, FetchError> {
        self.job = self.job.set_workers(workers)?;
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.job = self.job.with_headers(headers);
        self
    }

    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    /// Check the resource can be fetched in ranges and learn its size.
    #[instrument(name = "validate", skip(self), fields(url = %self.job.url()))]
    pub async fn validate(self) -> Result<ValidatedDownload, FetchError> {
        let headers = self.job.headers();

        let probe = self
            .transport
            .probe(self.job.url(), &headers, Some(PROBE_RANGE))
            .await?;
        if probe.content_length != Some(PROBE_RANGE.len()) {
            warn!(content_length = ?probe.content_length, "Range probe ignored by server");
            return Err(FetchError::ResourceNotChunkable);
        }
        let mut received = 0u64;
        let mut stream = probe.stream;
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
            if received > PROBE_RANGE.len() {
                break;
            }
        }
        if received != PROBE_RANGE.len() {
            warn!(received, "Range probe returned an unexpected body");
            return Err(FetchError::ResourceNotChunkable);
        }

        // The body is dropped unread, only the announced length matters.
        let size = self
            .transport
            .probe(self.job.url(), &headers, None)
            .await?
            .content_length
            .filter(|size| *size > 0)
            .ok_or(FetchError::SizeUnknown)?;

        info!(size, "Resource supports ranged download");
        Ok(ValidatedDownload {
            job: self.job,
            transport: self.transport,
            cache: self.cache,
            hooks: self.hooks,
            options: self.options,
            headers: Arc::new(headers),
            size,
        })
    }
}

/// A job whose size and range support were confirmed.
pub struct ValidatedDownload {
    job: DownloadJob,
    transport: Arc<dyn RangeTransport>,
    cache: Arc<dyn PartCache>,
    hooks: ShutdownHooks,
    options: DownloadOptions,
    headers: Arc<HeaderMap>,
    size: u64,
}

impl ValidatedDownload {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    /// Number of ranges the resource is split into.
    pub fn workers(&self) -> usize {
        (*self.job.workers() as u64).min(self.size) as usize
    }

    pub fn cache_key(&self) -> String {
        cache_key(self.job.resource_id(), self.workers(), self.size)
    }

    /// Download the resource into `path`.
    ///
    /// On `IncompleteDownload` the output is removed but part files and the
    /// cache entry stay, so calling again resumes. After a successful merge
    /// their removal is deferred to the success hooks.
    #[instrument(name = "save_to", skip_all, fields(output = %path.as_ref().display(), size = self.size))]
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<PathBuf, FetchError> {
        let output = path.as_ref().to_path_buf();
        let ranges = partition(self.size, *self.job.workers());
        let workers = ranges.len();
        debug!(workers, chunk = self.size / workers as u64, "Partitioned resource");

        preallocate(&output, self.size).await?;

        let key = self.cache_key();
        let parts = self.part_files(&key, workers).await?;

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(1);

        let indicator = DownloadIndicator::new(ProgressIndicator::new(self.options.show_progress), Some(self.size));
        let tracker = Tracker::new(workers, indicator, status_rx, control_rx, self.options.tracker_timeout);
        let tracker_handle = tokio::spawn(tracker.run());

        let handles: Vec<JoinHandle<WorkerOutcome>> = ranges
            .iter()
            .zip(&parts)
            .enumerate()
            .map(|(id, (range, part))| {
                let worker = Worker::new(
                    id,
                    self.job.url().clone(),
                    *range,
                    self.headers.clone(),
                    part.clone(),
                    self.transport.clone(),
                    status_tx.clone(),
                    self.options.backoff,
                );
                tokio::spawn(worker.run())
            })
            .collect();
        drop(status_tx);

        let aborts: Vec<_> = handles
            .iter()
            .map(JoinHandle::abort_handle)
            .chain(std::iter::once(tracker_handle.abort_handle()))
            .collect();
        let interrupt_hook = self.hooks.on_interrupt(move || {
            for task in aborts {
                task.abort();
            }
        });

        while !handles.iter().all(JoinHandle::is_finished) {
            tokio::time::sleep(self.options.poll_interval).await;
        }
        let mut finished = 0;
        for handle in handles {
            match handle.await {
                Ok(WorkerOutcome::Done) => finished += 1,
                Ok(WorkerOutcome::Failed) => {}
                Err(err) => error!(error = %err, "Worker task died"),
            }
        }

        let succeeded = join_tracker(tracker_handle, &control_tx, self.options.settle, self.options.tracker_grace)
            .await
            .unwrap_or(finished);
        drop(control_tx);
        self.hooks.unregister(interrupt_hook);

        if succeeded != workers {
            error!(succeeded, workers, "Download incomplete, keeping parts for resume");
            if let Err(err) = fs::remove_file(&output).await {
                debug!(error = %err, "No output to remove");
            }
            return Err(FetchError::IncompleteDownload { done: succeeded, expected: workers });
        }

        let written = merge_parts(&parts, &output).await?;
        info!(written, output = %output.display(), "Merged parts");

        let cache = self.cache.clone();
        self.hooks.on_success(move || async move {
            cleanup(cache.as_ref(), &key, &parts).await;
        });
        Ok(output)
    }

    /// Part files recorded for `key`, or freshly allocated ones.
    async fn part_files(&self, key: &str, workers: usize) -> Result<Vec<PathBuf>, FetchError> {
        match self.cache.get(key).await {
            Ok(Some(parts)) if parts.len() == workers => {
                info!(key, "Resuming a previous attempt");
                return Ok(parts);
            }
            Ok(Some(parts)) => {
                warn!(key, cached = parts.len(), workers, "Cached parts don't match worker count, starting over")
            }
            Ok(None) => {}
            Err(err) => warn!(key, error = %err, "Unreadable cache entry, starting over"),
        }

        let dir = std::path::absolute(&self.options.parts_dir)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| FetchError::FileSystem { path: dir.clone(), source })?;
        let parts = (0..workers)
            .map(|_| allocate_part(&dir))
            .collect::<Result<Vec<_>, _>>()?;
        self.cache.set(key, &parts).await?;
        debug!(key, dir = %dir.display(), "Allocated part files");
        Ok(parts)
    }
}

/// Join the tracker's success count. A tracker still running after `settle`
/// is sent `Stop`, and aborted when `grace` passes as well. `None` means no
/// count could be joined.
async fn join_tracker(
    mut handle: JoinHandle<usize>,
    control: &mpsc::Sender<TrackerControl>,
    settle: Duration,
    grace: Duration,
) -> Option<usize> {
    if let Ok(joined) = timeout(settle, &mut handle).await {
        return joined.ok();
    }
    debug!("Tracker still running, asking it to stop");
    if let Err(err) = control.try_send(TrackerControl::Stop) {
        debug!(error = %err, "Can't send stop to tracker");
    }
    match timeout(grace, &mut handle).await {
        Ok(joined) => joined.ok(),
        Err(_) => {
            warn!("Tracker did not stop in time, aborting it");
            handle.abort();
            None
        }
    }
}

fn allocate_part(dir: &Path) -> Result<PathBuf, FetchError> {
    let (_, path) = tempfile::Builder::new()
        .prefix("mf")
        .tempfile_in(dir)
        .and_then(|file| file.keep().map_err(|err| err.error))
        .map_err(|source| FetchError::FileSystem { path: dir.to_path_buf(), source })?;
    Ok(path)
}

/// Reserve `size` bytes at `path` to fail before any network traffic when the
/// disk is full. The placeholder is removed again, merging recreates it.
async fn preallocate(path: &Path, size: u64) -> Result<(), FetchError> {
    let reserved = async {
        let mut file = File::create(path).await?;
        file.seek(SeekFrom::Start(size.saturating_sub(1))).await?;
        file.write_all(&[0]).await?;
        file.sync_all().await
    }
    .await;
    if let Err(err) = fs::remove_file(path).await {
        debug!(error = %err, "No placeholder to remove");
    }
    reserved.map_err(|source| FetchError::FileSystem { path: path.to_path_buf(), source })
}

/// Forget the cache entry and delete the part files of a finished download.
async fn cleanup(cache: &dyn PartCache, key: &str, parts: &[PathBuf]) {
    if let Err(err) = cache.forget(key).await {
        warn!(key, error = %err, "Can't forget cache entry");
    }
    for part in parts {
        if let Err(err) = fs::remove_file(part).await {
            warn!(part = %part.display(), error = %err, "Can't remove part file");
        }
    }
    debug!(key, "Cleaned up part files");
}

#[cfg(test)]
mod tests {
    use super::*;

    use sha2::{Digest, Sha256};
    use url::Url;

    use super::super::options::Backoff;
    use crate::shared::cache::MemoryCache;
    use crate::shared::logging::test_logger_init;
    use crate::testing::{MockTransport, RequestKind, sample_bytes};

    struct Setup {
        dir: tempfile::TempDir,
        transport: Arc<MockTransport>,
        cache: Arc<MemoryCache>,
        hooks: ShutdownHooks,
    }

    impl Setup {
        fn new(transport: MockTransport) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                transport: Arc::new(transport),
                cache: Arc::new(MemoryCache::new()),
                hooks: ShutdownHooks::new(),
            }
        }

        fn options(&self) -> DownloadOptions {
            DownloadOptions::default()
                .with_parts_dir(self.dir.path().join("parts"))
                .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
                .with_poll_interval(Duration::from_millis(5))
                .with_tracker_timeout(Duration::from_millis(20))
                .with_settle(Duration::from_secs(1))
                .with_tracker_grace(Duration::from_millis(100))
                .with_show_progress(false)
        }

        fn downloader(&self, workers: i64) -> Downloader {
            let job = DownloadJob::new(Url::parse("http://media.test/clip.mp4?token=abc").unwrap(), "page/1#video");
            Downloader::new(job, self.transport.clone(), self.cache.clone(), self.hooks.clone())
                .with_options(self.options())
                .set_workers(workers)
                .unwrap()
        }

        fn output(&self) -> PathBuf {
            self.dir.path().join("clip.mp4")
        }
    }

    fn sha256(bytes: &[u8]) -> Vec<u8> {
        Sha256::digest(bytes).to_vec()
    }

    #[tokio::test]
    async fn test_validate_rejects_server_without_ranges() {
        let setup = Setup::new(MockTransport::new(sample_bytes(4096)).without_ranges());
        let result = setup.downloader(4).validate().await;
        assert!(matches!(result, Err(FetchError::ResourceNotChunkable)));
    }

    #[tokio::test]
    async fn test_validate_requires_size() {
        let setup = Setup::new(MockTransport::new(sample_bytes(4096)).without_length());
        let result = setup.downloader(4).validate().await;
        assert!(matches!(result, Err(FetchError::ResourceNotChunkable)));

        let setup = Setup::new(MockTransport::new(sample_bytes(4096)).without_full_length());
        let result = setup.downloader(4).validate().await;
        assert!(matches!(result, Err(FetchError::SizeUnknown)));
    }

    #[tokio::test]
    async fn test_validate_sends_probe_range() {
        let setup = Setup::new(MockTransport::new(sample_bytes(4096)));
        let validated = setup.downloader(4).validate().await.unwrap();
        assert_eq!(validated.size(), 4096);

        let requests = setup.transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].kind, RequestKind::Probe);
        assert_eq!(requests[0].range, Some(ByteRange::new(10, 20)));
        assert_eq!(requests[1].range, None);
        assert!(requests[0].headers.contains_key("user-agent"));
    }

    #[tokio::test]
    async fn test_invalid_worker_count_does_no_io() {
        let setup = Setup::new(MockTransport::new(sample_bytes(64)));
        let job = DownloadJob::new(Url::parse("http://media.test/a").unwrap(), "a");
        for workers in [0, -1] {
            let result = Downloader::new(job.clone(), setup.transport.clone(), setup.cache.clone(), setup.hooks.clone())
                .set_workers(workers);
            assert!(matches!(result, Err(FetchError::InvalidWorkerCount(n)) if n == workers));
        }
        assert!(setup.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_save_matches_source() {
        let body = sample_bytes(100_003);
        let setup = Setup::new(MockTransport::new(body.clone()));
        let validated = setup.downloader(8).validate().await.unwrap();

        let saved = validated.save_to(setup.output()).await.unwrap();

        assert_eq!(saved, setup.output());
        assert_eq!(sha256(&std::fs::read(&saved).unwrap()), sha256(&body));
        assert_eq!(setup.transport.fetched_ranges().len(), 8);
        assert!(setup.cache.has(&validated.cache_key()).await.unwrap());
        assert_eq!(setup.hooks.pending_success(), 1);
    }

    #[tokio::test]
    async fn test_recovers_from_flaky_worker() {
        test_logger_init(tracing::Level::DEBUG);
        let body = sample_bytes(3_200_000);
        // Worker 2 owns 1_600_000..=2_399_999 and loses its connection twice.
        let transport = MockTransport::new(body.clone()).flaky(1_600_000..2_400_000, 2, 100_000);
        let setup = Setup::new(transport);
        let validated = setup.downloader(4).validate().await.unwrap();

        let saved = validated.save_to(setup.output()).await.unwrap();

        assert_eq!(sha256(&std::fs::read(&saved).unwrap()), sha256(&body));
        let worker_two: Vec<_> = setup
            .transport
            .fetched_ranges()
            .into_iter()
            .filter(|range| range.end == 2_399_999)
            .collect();
        assert_eq!(
            worker_two,
            vec![
                ByteRange::new(1_600_000, 2_399_999),
                ByteRange::new(1_700_000, 2_399_999),
                ByteRange::new(1_800_000, 2_399_999),
            ]
        );
        let mut others: Vec<_> = setup
            .transport
            .fetched_ranges()
            .into_iter()
            .filter(|range| range.end != 2_399_999)
            .collect();
        others.sort_by_key(|range| range.start);
        assert_eq!(
            others,
            vec![
                ByteRange::new(0, 799_999),
                ByteRange::new(800_000, 1_599_999),
                ByteRange::new(2_400_000, 3_199_999),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_uses_cached_parts() {
        let body = sample_bytes(40_000);
        let setup = Setup::new(MockTransport::new(body.clone()));
        let validated = setup.downloader(2).validate().await.unwrap();

        let parts_dir = setup.dir.path().join("parts");
        std::fs::create_dir_all(&parts_dir).unwrap();
        let first = parts_dir.join("first");
        let second = parts_dir.join("second");
        std::fs::write(&first, &body[..20_000]).unwrap();
        std::fs::write(&second, &body[20_000..25_000]).unwrap();
        setup
            .cache
            .set(&validated.cache_key(), &[first.clone(), second.clone()])
            .await
            .unwrap();

        let saved = validated.save_to(setup.output()).await.unwrap();

        assert_eq!(std::fs::read(&saved).unwrap(), body);
        assert_eq!(setup.transport.fetched_ranges(), vec![ByteRange::new(25_000, 39_999)]);
    }

    #[tokio::test]
    async fn test_incomplete_download_keeps_resume_state() {
        let body = sample_bytes(10_000);
        let setup = Setup::new(MockTransport::new(body.clone()));
        let validated = setup.downloader(2).validate().await.unwrap();

        let parts_dir = setup.dir.path().join("parts");
        std::fs::create_dir_all(&parts_dir).unwrap();
        let good = parts_dir.join("good");
        let oversized = parts_dir.join("oversized");
        std::fs::write(&good, &body[..2_000]).unwrap();
        std::fs::write(&oversized, vec![0u8; 6_000]).unwrap();
        let key = validated.cache_key();
        setup.cache.set(&key, &[good.clone(), oversized.clone()]).await.unwrap();

        let result = validated.save_to(setup.output()).await;

        assert!(matches!(result, Err(FetchError::IncompleteDownload { done: 1, expected: 2 })));
        assert!(!setup.output().exists());
        assert_eq!(setup.cache.get(&key).await.unwrap(), Some(vec![good.clone(), oversized]));
        assert_eq!(std::fs::read(&good).unwrap(), body[..5_000]);
        assert_eq!(setup.hooks.pending_success(), 0);
    }

    #[tokio::test]
    async fn test_success_hooks_remove_resume_state() {
        let body = sample_bytes(30_000);
        let setup = Setup::new(MockTransport::new(body.clone()));
        let validated = setup.downloader(3).validate().await.unwrap();
        let key = validated.cache_key();

        validated.save_to(setup.output()).await.unwrap();
        let parts = setup.cache.get(&key).await.unwrap().unwrap();
        assert!(parts.iter().all(|part| part.exists()));

        setup.hooks.succeeded().await;

        assert!(!setup.cache.has(&key).await.unwrap());
        assert!(parts.iter().all(|part| !part.exists()));
        assert_eq!(std::fs::read(setup.output()).unwrap(), body);
    }

    #[tokio::test]
    async fn test_more_workers_than_bytes() {
        let body = sample_bytes(24);
        let setup = Setup::new(MockTransport::new(body.clone()));
        let validated = setup.downloader(32).validate().await.unwrap();
        assert_eq!(validated.workers(), 24);

        let saved = validated.save_to(setup.output()).await.unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), body);
    }

    #[tokio::test]
    async fn test_unwritable_output_is_filesystem_error() {
        let setup = Setup::new(MockTransport::new(sample_bytes(4096)));
        let validated = setup.downloader(2).validate().await.unwrap();
        let output = setup.dir.path().join("missing-dir").join("clip.mp4");

        let result = validated.save_to(&output).await;

        assert!(matches!(result, Err(FetchError::FileSystem { .. })));
        assert!(setup.transport.fetched_ranges().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_aborts_tasks_and_keeps_resume_state() {
        let body = sample_bytes(40_000);
        // The second range loses its connection before the first byte, forever.
        let transport = MockTransport::new(body.clone()).flaky(20_000..40_000, usize::MAX, 0);
        let setup = Setup::new(transport);
        let validated = setup.downloader(2).validate().await.unwrap();
        let key = validated.cache_key();

        let run = tokio::time::timeout(Duration::from_millis(300), validated.save_to(setup.output())).await;
        assert!(run.is_err());
        assert!(!setup.transport.fetched_ranges().is_empty());

        setup.hooks.interrupted();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = setup.transport.fetched_ranges().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(setup.transport.fetched_ranges().len(), before);

        let parts = setup.cache.get(&key).await.unwrap().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(std::fs::read(&parts[0]).unwrap(), body[..20_000]);
        assert_eq!(std::fs::metadata(&parts[1]).unwrap().len(), 0);
        assert!(!setup.output().exists());
        assert_eq!(setup.hooks.pending_success(), 0);
    }

    #[tokio::test]
    async fn test_join_tracker_returns_count() {
        let (control_tx, mut control_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async { 4 });

        let joined = join_tracker(handle, &control_tx, Duration::from_secs(1), Duration::from_millis(10)).await;

        assert_eq!(joined, Some(4));
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_tracker_sends_stop_after_settle() {
        let (control_tx, mut control_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            match control_rx.recv().await {
                Some(TrackerControl::Stop) => 3,
                None => 0,
            }
        });

        let joined = join_tracker(handle, &control_tx, Duration::from_millis(10), Duration::from_secs(1)).await;

        assert_eq!(joined, Some(3));
    }

    #[tokio::test]
    async fn test_stuck_tracker_is_aborted_and_workers_decide() {
        let (control_tx, _control_rx) = mpsc::channel(1);
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<usize>().await
        });

        let joined = join_tracker(handle, &control_tx, Duration::from_millis(10), Duration::from_millis(10)).await;

        assert_eq!(joined, None);
        // The sender is dropped once the aborted task is torn down.
        let dropped = tokio::time::timeout(Duration::from_secs(1), alive_rx).await.unwrap();
        assert!(dropped.is_err());
        let workers = 4;
        assert_eq!(joined.unwrap_or(workers), workers);
    }
}
