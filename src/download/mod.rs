//! Parallel, resumable ranged download of a single resource.
//!
//! A [`Downloader`] validates the resource, then [`ValidatedDownload::save_to`]
//! splits it into ranges, runs one [`worker::Worker`] task per range and a
//! [`tracker::Tracker`] task that aggregates their status events, and finally
//! merges the part files into the output.

pub mod downloader;
pub mod job;
pub mod merge;
pub mod options;
pub mod partition;
pub mod simple;
pub mod status;
pub mod tracker;
pub mod worker;

pub use downloader::{Downloader, ValidatedDownload};
pub use job::DownloadJob;
pub use options::{Backoff, DownloadOptions};
pub use partition::{ByteRange, partition};
pub use simple::SimpleDownloader;
