//! Per-batch progress for a backup run.

use std::fmt;
use std::time::{Duration, Instant};

/// Running totals across the batches of one backup.
pub struct BatchProgress {
    start_time: Instant,
    last_batch_time: Instant,
    total_bytes: u64,
    total_batches: usize,
    written_bytes: u64,
    written_batches: usize,
}

/// State after a batch has been written, formatted for the log.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSnapshot {
    pub batch: usize,
    pub total_batches: usize,
    pub written_bytes: u64,
    pub total_bytes: u64,
    /// Rate of the last batch in bytes/second
    pub bytes_per_second: u64,
    pub eta_seconds: Option<u64>,
}

impl BatchProgress {
    pub fn new(total_bytes: u64, total_batches: usize) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_batch_time: now,
            total_bytes,
            total_batches,
            written_bytes: 0,
            written_batches: 0,
        }
    }

    /// Record a written batch of `bytes`.
    pub fn batch_written(&mut self, bytes: u64) -> BatchSnapshot {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_batch_time).as_secs_f64();
        self.last_batch_time = now;
        self.written_bytes += bytes;
        self.written_batches += 1;

        let bytes_per_second = if elapsed > 0.0 {
            (bytes as f64 / elapsed) as u64
        } else {
            0
        };
        let eta_seconds = (bytes_per_second > 0).then(|| {
            self.total_bytes.saturating_sub(self.written_bytes) / bytes_per_second
        });

        BatchSnapshot {
            batch: self.written_batches,
            total_batches: self.total_batches,
            written_bytes: self.written_bytes,
            total_bytes: self.total_bytes,
            bytes_per_second,
            eta_seconds,
        }
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since the run started
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.written_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl BatchSnapshot {
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes > 0 {
            self.written_bytes as f64 / self.total_bytes as f64 * 100.0
        } else {
            100.0
        }
    }
}

impl fmt::Display for BatchSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {}/{}: {} / {} ({:.1}%), {}",
            self.batch,
            self.total_batches,
            format_bytes(self.written_bytes),
            format_bytes(self.total_bytes),
            self.percent_complete(),
            format_speed(self.bytes_per_second)
        )?;
        if let Some(eta) = self.eta_seconds {
            write!(f, ", ETA {}", format_duration(eta))?;
        }
        Ok(())
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
