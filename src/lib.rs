//! # mediafetch
//!
//! Parallel, resumable, chunked download of media resources over HTTP.
//!
//! The resource is split into byte ranges fetched by independent worker
//! tasks. Each range lands in its own part file so an interrupted run picks
//! up where it stopped, and the parts are merged once every worker is done.

pub mod download;
pub mod features;
pub mod shared;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
