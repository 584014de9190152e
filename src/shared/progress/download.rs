use std::time::{Duration, Instant};

use indicatif::HumanBytes;

use super::indicator::ProgressIndicator;

/// Minimum time between two redraws.
pub const REDRAW_INTERVAL: Duration = Duration::from_millis(200);
/// Width of the window the throughput is averaged over.
pub const SPEED_WINDOW: Duration = Duration::from_secs(2);

/// Byte counter with a throughput estimate, rendered through a [`ProgressIndicator`].
pub struct DownloadIndicator {
    indicator: ProgressIndicator,
    total: Option<u64>,
    downloaded: u64,
    window_start: Instant,
    window_bytes: u64,
    /// Bytes per second over the last complete window.
    speed: f64,
    last_draw: Option<Instant>,
}

impl DownloadIndicator {
    pub fn new(indicator: ProgressIndicator, total: Option<u64>) -> Self {
        Self {
            indicator,
            total,
            downloaded: 0,
            window_start: Instant::now(),
            window_bytes: 0,
            speed: 0.0,
            last_draw: None,
        }
    }

    pub fn progress(&mut self, bytes: u64) {
        self.downloaded = self.downloaded.saturating_add(bytes);
        self.window_bytes = self.window_bytes.saturating_add(bytes);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn percent(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => self.downloaded as f64 * 100.0 / total as f64,
            _ => 0.0,
        }
    }

    pub fn display(&mut self, caption: &str) -> bool {
        self.display_at(Instant::now(), caption)
    }

    /// Redraw unless the last redraw happened less than [`REDRAW_INTERVAL`]
    /// before `now`. Returns whether the line was redrawn.
    pub fn display_at(&mut self, now: Instant, caption: &str) -> bool {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= SPEED_WINDOW {
            self.speed = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_start = now;
            self.window_bytes = 0;
        }

        if let Some(last) = self.last_draw {
            if now.saturating_duration_since(last) < REDRAW_INTERVAL {
                return false;
            }
        }
        self.last_draw = Some(now);
        self.indicator.set(self.percent(), self.line(caption));
        true
    }

    fn line(&self, caption: &str) -> String {
        let size = match self.total {
            Some(total) => format!("{} / {}", HumanBytes(self.downloaded), HumanBytes(total)),
            None => HumanBytes(self.downloaded).to_string(),
        };
        let speed = HumanBytes(self.speed as u64);
        if caption.is_empty() {
            format!("{size} @ {speed}/s")
        } else {
            format!("{size} @ {speed}/s {caption}")
        }
    }

    /// Draw the final state and keep it on screen.
    pub fn finish(&mut self, caption: &str) {
        self.indicator.set(self.percent(), self.line(caption));
        self.indicator.finish();
    }

    pub fn indicator(&self) -> &ProgressIndicator {
        &self.indicator
    }
}
