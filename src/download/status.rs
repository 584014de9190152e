//! Messages exchanged between workers, the tracker and the orchestrator.

/// Event a worker reports about its range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A range request is about to be sent.
    Starting,
    /// Bytes newly present in the part file.
    Progressing(u64),
    /// The last attempt failed and will be retried.
    Struggling(String),
    Done,
    /// The worker gave up on its range.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerMessage {
    pub worker_id: usize,
    pub event: StatusEvent,
}

impl WorkerMessage {
    pub fn new(worker_id: usize, event: StatusEvent) -> Self {
        Self { worker_id, event }
    }
}

/// Sent by the orchestrator on the tracker's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerControl {
    Stop,
}

/// How a worker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Done,
    Failed,
}
