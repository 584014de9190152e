use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use crate::shared::errors::FetchError;

const COPY_BUFFER: usize = 8 * 1024;

/// Concatenate `parts` in order into `output`, returning the bytes written.
///
/// Part lengths are not checked here. A failed merge removes `output`.
#[instrument(skip(parts), fields(parts = parts.len(), output = %output.display()))]
pub async fn merge_parts(parts: &[PathBuf], output: &Path) -> Result<u64, FetchError> {
    let file = File::create(output)
        .await
        .map_err(|source| FetchError::FileSystem { path: output.to_path_buf(), source })?;
    let merged = concat(parts, file).await;
    if merged.is_err() {
        if let Err(err) = fs::remove_file(output).await {
            warn!(error = %err, "Can't remove partially merged output");
        }
    }
    merged
}

async fn concat(parts: &[PathBuf], file: File) -> Result<u64, FetchError> {
    let mut writer = BufWriter::with_capacity(COPY_BUFFER, file);
    let mut total = 0;
    for part in parts {
        let mut reader = File::open(part)
            .await
            .map_err(|source| FetchError::FileSystem { path: part.clone(), source })?;
        let copied = io::copy(&mut reader, &mut writer).await?;
        debug!(part = %part.display(), copied, "Merged part");
        total += copied;
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(total)
}
