pub mod cache;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod progress;
