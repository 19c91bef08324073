//! Command-line surface
//!
//! Argument parsing and the terminal progress display.

pub mod args;
pub mod progress;

// Re-export main types
pub use args::CliArgs;
pub use progress::{DownloadStats, ProgressDisplay};
