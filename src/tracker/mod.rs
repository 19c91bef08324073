//! Tracker client
//!
//! Periodic HTTP announces: report progress, retrieve the peer list.

pub mod client;

// Re-export main types
pub use client::{Event, FixedMetrics, Metrics, TrackerClient};
