use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use derive_getters::Getters;
use derive_setters::Setters;
use rand::Rng;

/// Jittered delay a worker sleeps between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max { Self { min, max } } else { Self { min: max, max: min } }
    }

    pub fn bounds(&self) -> RangeInclusive<Duration> {
        self.min..=self.max
    }

    /// A random delay within the bounds.
    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500), Duration::from_millis(3000))
    }
}

/// Tunables of a chunked download.
#[derive(Debug, Clone, Getters, Setters)]
#[setters(prefix = "with_")]
pub struct DownloadOptions {
    /// Directory new part files are created in.
    #[setters(into)]
    pub(crate) parts_dir: PathBuf,
    pub(crate) backoff: Backoff,
    /// How often the orchestrator checks whether workers are finished.
    pub(crate) poll_interval: Duration,
    /// Tracker receive timeout, it redraws when nothing arrived.
    pub(crate) tracker_timeout: Duration,
    /// How long the tracker may take to drain events once workers are finished.
    pub(crate) settle: Duration,
    /// Grace period after `Stop` before the tracker is aborted.
    pub(crate) tracker_grace: Duration,
    pub(crate) show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            parts_dir: std::env::temp_dir(),
            backoff: Backoff::default(),
            poll_interval: Duration::from_millis(500),
            tracker_timeout: Duration::from_millis(500),
            settle: Duration::from_secs(2),
            tracker_grace: Duration::from_millis(300),
            show_progress: true,
        }
    }
}
