//! Download coordination
//!
//! The coordinator owns the piece plan, supervises one worker per peer,
//! and keeps the tracker informed across the download's lifecycle.

pub mod manager;
pub mod plan;

// Re-export main types
pub use manager::{DownloadConfig, Downloader, LiveMetrics, ProgressSnapshot};
pub use plan::PiecePlan;
