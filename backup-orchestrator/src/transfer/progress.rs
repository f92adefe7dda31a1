//! Byte and object accounting for a transfer run.

use std::time::{Duration, Instant};

/// Running totals for one upload or download run.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    started: Instant,
    /// Bytes the run is expected to move
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub transferred_objects: usize,
    pub tables_transferred: usize,
    pub tables_skipped: usize,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            started: Instant::now(),
            total_bytes,
            transferred_bytes: 0,
            transferred_objects: 0,
            tables_transferred: 0,
            tables_skipped: 0,
        }
    }

    pub fn record_batch(&mut self, objects: usize, bytes: u64) {
        self.transferred_objects += objects;
        self.transferred_bytes += bytes;
    }

    pub fn record_table(&mut self) {
        self.tables_transferred += 1;
    }

    pub fn record_skip(&mut self) {
        self.tables_skipped += 1;
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        ((self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average throughput since the run started, in bytes per second.
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    match seconds {
        0..=59 => format!("{}s", seconds),
        60..=3599 => format!("{}m {}s", seconds / 60, seconds % 60),
        _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
    }
}
