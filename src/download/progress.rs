use std::fmt;
use std::time::{Duration, Instant};

/// Minimum delay between two progress reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

const MB: f64 = 1_048_576.0;

/// Byte counter of a running transfer with throttled reporting.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    current: u64,
    length: u64,
    last_reported_at: Option<Instant>,
    interval: Duration,
}

/// A progress snapshot, rendered as `42.5 % (1.2mb / 2.9mb)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub percent: f64,
    pub mb_complete: f64,
    pub total_mb: f64,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} % ({}mb / {}mb)",
            self.percent, self.mb_complete, self.total_mb
        )
    }
}

impl DownloadProgress {
    /// Tracks a transfer of `length` bytes.
    pub fn new(length: u64) -> Self {
        Self::with_interval(length, PROGRESS_INTERVAL)
    }

    pub fn with_interval(length: u64, interval: Duration) -> Self {
        Self {
            current: 0,
            length,
            last_reported_at: None,
            interval,
        }
    }

    /// Bytes received so far.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Declared length of the transfer.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Counts `chunk_len` bytes received at `now`.
    ///
    /// Returns a report unless one was produced less than the interval ago.
    pub fn record(&mut self, chunk_len: usize, now: Instant) -> Option<ProgressReport> {
        self.current += chunk_len as u64;

        if let Some(last) = self.last_reported_at {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_reported_at = Some(now);
        Some(self.report())
    }

    /// Current snapshot.
    pub fn report(&self) -> ProgressReport {
        let percent = if self.length == 0 {
            100.0
        } else {
            round1(100.0 * self.current as f64 / self.length as f64)
        };
        ProgressReport {
            percent,
            mb_complete: round1(self.current as f64 / MB),
            total_mb: round1(self.length as f64 / MB),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_are_throttled() {
        let start = Instant::now();
        let mut progress = DownloadProgress::new(4 * 1_048_576);

        assert!(progress.record(1_048_576, start).is_some());
        assert!(progress.record(1_048_576, start + Duration::from_millis(500)).is_none());
        assert!(progress.record(1_048_576, start + Duration::from_millis(1999)).is_none());

        let report = progress
            .record(1_048_576, start + Duration::from_secs(2))
            .expect("interval elapsed");
        assert_eq!(report.percent, 100.0);
        assert_eq!(report.mb_complete, 4.0);
        assert_eq!(progress.current(), 4 * 1_048_576);
    }

    #[test]
    fn test_report_rendering() {
        let mut progress = DownloadProgress::new(3 * 1_048_576);
        let report = progress.record(1_048_576, Instant::now()).unwrap();

        assert_eq!(report.to_string(), "33.3 % (1mb / 3mb)");
    }
}
