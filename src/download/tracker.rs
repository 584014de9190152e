use std::time::Duration;

use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tracing::{debug, info, instrument};

use super::status::{StatusEvent, TrackerControl, WorkerMessage};
use crate::shared::progress::DownloadIndicator;

/// Counters the tracker derives from worker events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
    remaining: usize,
    active: usize,
    succeeded: usize,
    downloaded: u64,
}

impl TrackerState {
    pub fn new(workers: usize) -> Self {
        Self { remaining: workers, ..Self::default() }
    }

    pub fn apply(&mut self, event: &StatusEvent) {
        match event {
            StatusEvent::Starting => self.active += 1,
            StatusEvent::Progressing(bytes) => self.downloaded += bytes,
            StatusEvent::Struggling(_) => self.active = self.active.saturating_sub(1),
            StatusEvent::Done => {
                self.succeeded += 1;
                self.remaining = self.remaining.saturating_sub(1);
                self.active = self.active.saturating_sub(1);
            }
            StatusEvent::Failed => {
                self.remaining = self.remaining.saturating_sub(1);
                self.active = self.active.saturating_sub(1);
            }
        }
    }

    pub fn finished(&self) -> bool {
        self.remaining == 0
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }
}

/// Observes worker events and drives the progress line.
pub struct Tracker {
    state: TrackerState,
    indicator: DownloadIndicator,
    status: UnboundedReceiver<WorkerMessage>,
    control: Receiver<TrackerControl>,
    timeout: Duration,
}

impl Tracker {
    pub fn new(
        workers: usize,
        indicator: DownloadIndicator,
        status: UnboundedReceiver<WorkerMessage>,
        control: Receiver<TrackerControl>,
        timeout: Duration,
    ) -> Self {
        Self { state: TrackerState::new(workers), indicator, status, control, timeout }
    }

    fn caption(&self) -> String {
        format!("({} workers)", self.state.active())
    }

    fn redraw(&mut self) {
        let caption = self.caption();
        self.indicator.display(&caption);
    }

    /// Run until every worker reported, `Stop` arrives or all senders are gone.
    ///
    /// Returns the number of workers that reported `Done`.
    #[instrument(name = "tracker", skip_all)]
    pub async fn run(mut self) -> usize {
        while !self.state.finished() {
            tokio::select! {
                biased;
                message = self.status.recv() => match message {
                    Some(WorkerMessage { worker_id, event }) => {
                        match &event {
                            StatusEvent::Progressing(bytes) => self.indicator.progress(*bytes),
                            other => debug!(worker_id, event = ?other, "Worker status"),
                        }
                        self.state.apply(&event);
                    }
                    None => {
                        debug!("Every worker hung up");
                        break;
                    }
                },
                control = self.control.recv() => {
                    debug!(?control, "Tracker stopped by orchestrator");
                    break;
                }
                _ = tokio::time::sleep(self.timeout) => {}
            }
            self.redraw();
        }

        let caption = self.caption();
        self.indicator.finish(&caption);
        info!(
            succeeded = self.state.succeeded(),
            downloaded = self.state.downloaded(),
            "Tracker finished"
        );
        self.state.succeeded()
    }
}
