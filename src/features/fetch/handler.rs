use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::cli::FetchArgs;
use crate::download::{DownloadJob, DownloadOptions, Downloader, SimpleDownloader};
use crate::shared::cache::fs::DEFAULT_MAX_AGE;
use crate::shared::cache::{FsCache, MemoryCache, PartCache};
use crate::shared::errors::FetchError;
use crate::shared::lifecycle::ShutdownHooks;
use crate::shared::network::headers::{merge_headers, parse_header_lines};
use crate::shared::network::http::HttpAdapter;
use crate::shared::network::RangeTransport;

async fn open_cache(args: &FetchArgs) -> Result<Arc<dyn PartCache>, FetchError> {
    if args.no_resume {
        info!("Resume disabled, keeping part bookkeeping in memory.");
        return Ok(Arc::new(MemoryCache::new()));
    }
    let cache = FsCache::open(args.cache_dir()).await?;
    if let Err(err) = cache.gc(DEFAULT_MAX_AGE).await {
        warn!(error = %err, "Can't clean up stale resume state");
    }
    Ok(Arc::new(cache))
}

/// Download `args.url` and return where it was saved.
#[instrument(skip_all, fields(url = %args.url))]
pub async fn handle(args: FetchArgs, hooks: ShutdownHooks) -> Result<PathBuf, FetchError> {
    let output = args.output_path();
    let transport: Arc<dyn RangeTransport> = Arc::new(HttpAdapter::new(&args.http_args)?);
    let headers = merge_headers(
        &args.http_args.job_headers()?,
        &parse_header_lines(args.headers.iter().map(String::as_str))?,
    );

    let mut options = DownloadOptions::default().with_show_progress(!args.quiet);
    if let Some(parts_dir) = &args.parts_dir {
        options = options.with_parts_dir(parts_dir.clone());
    }

    let job = DownloadJob::new(args.url.clone(), args.resource_id())
        .set_workers(args.workers)?
        .with_headers(headers);
    let resolved_headers = job.headers();
    let cache = open_cache(&args).await?;
    let downloader = Downloader::new(job, transport.clone(), cache, hooks).with_options(options);

    match downloader.validate().await {
        Ok(validated) => {
            info!(size = validated.size(), workers = validated.workers(), "Starting chunked download");
            validated.save_to(&output).await
        }
        Err(FetchError::ResourceNotChunkable) if !args.no_fallback => {
            warn!("Server ignores range requests, falling back to a single connection.");
            SimpleDownloader::new(args.url.clone(), resolved_headers, transport)
                .show_progress(!args.quiet)
                .save_to(&output)
                .await
        }
        Err(err) => Err(err),
    }
}
