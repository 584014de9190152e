use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, instrument, trace, warn};
use url::Url;

use super::options::Backoff;
use super::partition::ByteRange;
use super::status::{StatusEvent, WorkerMessage, WorkerOutcome};
use crate::shared::errors::FetchError;
use crate::shared::network::RangeTransport;

/// Downloads one byte range into its part file, retrying until it is complete.
pub struct Worker {
    id: usize,
    url: Url,
    range: ByteRange,
    headers: Arc<HeaderMap>,
    part: PathBuf,
    transport: Arc<dyn RangeTransport>,
    status: UnboundedSender<WorkerMessage>,
    backoff: Backoff,
    /// Part file bytes already announced to the tracker.
    reported: u64,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        url: Url,
        range: ByteRange,
        headers: Arc<HeaderMap>,
        part: PathBuf,
        transport: Arc<dyn RangeTransport>,
        status: UnboundedSender<WorkerMessage>,
        backoff: Backoff,
    ) -> Self {
        Self { id, url, range, headers, part, transport, status, backoff, reported: 0 }
    }

    fn emit(&self, event: StatusEvent) {
        // The tracker may already be gone, the part file is what counts.
        let _ = self.status.send(WorkerMessage::new(self.id, event));
    }

    /// Announce part file growth the tracker has not seen yet.
    fn report(&mut self, len: u64) {
        if len > self.reported {
            self.emit(StatusEvent::Progressing(len - self.reported));
            self.reported = len;
        }
    }

    #[instrument(name = "worker", skip_all, fields(worker_id = self.id, range = %self.range))]
    pub async fn run(mut self) -> WorkerOutcome {
        loop {
            match self.attempt().await {
                Ok(outcome) => {
                    self.emit(match outcome {
                        WorkerOutcome::Done => StatusEvent::Done,
                        WorkerOutcome::Failed => StatusEvent::Failed,
                    });
                    debug!(?outcome, "Worker finished");
                    return outcome;
                }
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %err, ?delay, "Range download struggling, retrying");
                    self.emit(StatusEvent::Struggling(err.to_string()));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<WorkerOutcome, FetchError> {
        let mut file = match OpenOptions::new().create(true).append(true).open(&self.part).await {
            Ok(file) => file,
            Err(err) => {
                error!(error = %err, part = %self.part.display(), "Can't open part file");
                return Ok(WorkerOutcome::Failed);
            }
        };
        let written = file.metadata().await?.len();
        self.report(written);

        let expected = self.range.len();
        if written > expected {
            error!(written, expected, "Part file is larger than its range, discarding it");
            drop(file);
            if let Err(err) = fs::remove_file(&self.part).await {
                warn!(error = %err, "Can't remove corrupt part file");
            }
            return Ok(WorkerOutcome::Failed);
        }
        let Some(remaining) = self.range.skip(written) else {
            return Ok(WorkerOutcome::Done);
        };

        self.emit(StatusEvent::Starting);
        let streamed = self.stream_into(&mut file, remaining).await;
        file.flush().await?;
        streamed?;
        Ok(WorkerOutcome::Done)
    }

    async fn stream_into(&mut self, file: &mut File, remaining: ByteRange) -> Result<(), FetchError> {
        debug!(request = %remaining, "Requesting range");
        let mut body = self
            .transport
            .fetch(&self.url, &self.headers, Some(remaining))
            .await?
            .stream;

        let expected = remaining.len();
        let mut received = 0u64;
        while received < expected {
            let Some(chunk) = body.next().await else { break };
            let chunk = chunk?;
            let take = chunk.len().min((expected - received) as usize);
            if take < chunk.len() {
                warn!(extra = chunk.len() - take, "Server sent more than the requested range, ignoring the rest");
            }
            file.write_all(&chunk[..take]).await?;
            received += take as u64;
            self.reported += take as u64;
            trace!(received, expected, "Wrote chunk");
            self.emit(StatusEvent::Progressing(take as u64));
        }

        if received < expected {
            return Err(FetchError::UnexpectedEof { received, expected });
        }
        Ok(())
    }
}
