//! Terminal progress output.
pub mod download;
pub mod indicator;

pub use download::DownloadIndicator;
pub use indicator::ProgressIndicator;
