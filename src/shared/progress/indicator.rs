use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Resolution of the bar, one tick per tenth of a percent.
const SCALE: u64 = 1000;
const TEMPLATE: &str = "[{bar:50.green.bold}] {percent:>3}% {msg}";

/// Single line progress bar driven by a percentage.
#[derive(Clone)]
pub struct ProgressIndicator {
    bar: ProgressBar,
}

impl ProgressIndicator {
    /// Bar drawn on stdout, refreshed at most five times a second.
    pub fn stdout() -> Self {
        Self::with_target(ProgressDrawTarget::stdout_with_hz(5))
    }

    /// Bar that keeps its state but never draws.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    pub fn new(visible: bool) -> Self {
        if visible { Self::stdout() } else { Self::hidden() }
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(SCALE), target);
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self { bar }
    }

    /// Move the bar to `percent` (clamped to `0..=100`) and replace the caption.
    pub fn set(&self, percent: f64, caption: impl Into<String>) {
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        self.bar.set_position((percent * SCALE as f64 / 100.0).round() as u64);
        self.bar.set_message(caption.into());
    }

    pub fn percent(&self) -> f64 {
        self.bar.position() as f64 * 100.0 / SCALE as f64
    }

    pub fn caption(&self) -> String {
        self.bar.message()
    }

    /// Leave the last drawn line on screen.
    pub fn finish(&self) {
        self.bar.abandon();
    }

    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}
