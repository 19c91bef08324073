//! Progress display
//!
//! One rewritten terminal line while the download runs.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Download statistics for progress display
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    /// Total bytes downloaded and verified
    pub downloaded: u64,
    /// Total content size in bytes
    pub total: u64,
    /// Pieces verified so far
    pub pieces_complete: usize,
    /// Pieces in the torrent
    pub pieces_total: usize,
    /// Connected peers
    pub peers: usize,
}

impl DownloadStats {
    /// Fraction complete, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.downloaded as f64 / self.total as f64
    }

    /// Format bytes to a human readable string
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{:.2} {}", size, UNITS[unit])
    }

    /// Format a duration to a human readable string
    pub fn format_duration(duration: Duration) -> String {
        let total_secs = duration.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// Line-rewriting progress display for the terminal
pub struct ProgressDisplay {
    start_time: Instant,
    quiet: bool,
    prev_line_len: usize,
}

impl ProgressDisplay {
    pub fn new(quiet: bool) -> Self {
        Self {
            start_time: Instant::now(),
            quiet,
            prev_line_len: 0,
        }
    }

    /// Rewrite the status line with the latest stats
    pub fn update(&mut self, stats: &DownloadStats) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let line = format!(
            "{:>5.1}%  {} / {}  pieces {}/{}  peers {}",
            stats.progress() * 100.0,
            DownloadStats::format_bytes(stats.downloaded),
            DownloadStats::format_bytes(stats.total),
            stats.pieces_complete,
            stats.pieces_total,
            stats.peers,
        );
        let padding = self.prev_line_len.saturating_sub(line.len());
        print!("\r{}{}", line, " ".repeat(padding));
        self.prev_line_len = line.len();
        io::stdout().flush()
    }

    /// Print the closing summary
    pub fn print_complete(&mut self, stats: &DownloadStats) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!(
            "\rDownloaded {} in {}{}",
            DownloadStats::format_bytes(stats.total),
            DownloadStats::format_duration(self.start_time.elapsed()),
            " ".repeat(self.prev_line_len),
        );
        Ok(())
    }

    pub fn print_error(&mut self, message: &str) -> io::Result<()> {
        eprintln!("\rerror: {}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(DownloadStats::format_bytes(0), "0.00 B");
        assert_eq!(DownloadStats::format_bytes(1023), "1023.00 B");
        assert_eq!(DownloadStats::format_bytes(1024), "1.00 KiB");
        assert_eq!(DownloadStats::format_bytes(1536), "1.50 KiB");
        assert_eq!(DownloadStats::format_bytes(1024 * 1024 * 3), "3.00 MiB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(
            DownloadStats::format_duration(Duration::from_secs(125)),
            "2m 5s"
        );
        assert_eq!(
            DownloadStats::format_duration(Duration::from_secs(3700)),
            "1h 1m 40s"
        );
    }

    #[test]
    fn test_progress_fraction() {
        let stats = DownloadStats {
            downloaded: 512,
            total: 1024,
            ..Default::default()
        };
        assert!((stats.progress() - 0.5).abs() < f64::EPSILON);

        let empty = DownloadStats::default();
        assert_eq!(empty.progress(), 0.0);
    }
}
