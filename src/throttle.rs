use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Errors are reported at most once per this window, per reporter.
pub const ERROR_REPORT_WINDOW: Duration = Duration::from_secs(30);

/// Lock-free "at most once per window" gate for error logging.
///
/// The last report is stored as milliseconds since `base`, offset by one so
/// that zero means "never reported". Concurrent callers race on a single
/// compare-exchange; the loser simply stays quiet.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    base: Instant,
    last_report: AtomicU64,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            base: Instant::now(),
            last_report: AtomicU64::new(0),
        }
    }

    /// Returns true when the caller should log the error it just observed.
    pub fn should_report(&self) -> bool {
        let now = self.base.elapsed().as_millis() as u64 + 1;
        let last = self.last_report.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.window.as_millis() as u64 {
            return false;
        }
        self.last_report
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(ERROR_REPORT_WINDOW)
    }
}
