//! Per-source minimum refresh interval.
//!
//! A query may carry a `--min-interval=<seconds>` line (a SQL comment) that
//! caps how often it actually runs, independently of the global refresh cycle.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Marker that introduces the minimum interval in query text.
pub const MIN_INTERVAL_MARKER: &str = "--min-interval=";

/// Extract the minimum interval from query text.
///
/// The first line containing the marker wins. The marker must open that line,
/// after optional indentation, and be followed by an integer; anything else
/// (a trailing `-- --min-interval=60` comment, a non-numeric value) logs a
/// warning and yields zero. A missing marker also yields zero.
pub fn parse_min_interval(query: &str) -> Duration {
    let Some(line) = query.lines().find(|line| line.contains(MIN_INTERVAL_MARKER)) else {
        return Duration::ZERO;
    };

    let rest = line
        .trim_start()
        .strip_prefix(MIN_INTERVAL_MARKER)
        .map_or("", str::trim_start);
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();

    match digits.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => {
            tracing::warn!(line = %line.trim(), "Failed to parse min-interval, using 0");
            Duration::ZERO
        }
    }
}

/// Outcome of asking the throttle for permission to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Run now; the start time has been stamped.
    Run(Instant),
    /// Still inside the interval since the last run.
    Skip {
        /// Time since the last real run started.
        elapsed: Duration,
    },
}

/// Frequency cap for one source.
///
/// The last-run time is stamped when a run *starts*, so a trigger that arrives
/// while a slow query is still executing is also inside the interval.
#[derive(Debug)]
pub struct MinInterval {
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl MinInterval {
    /// Create a throttle with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(None),
        }
    }

    /// Build a throttle from the marker in query text.
    pub fn from_query(query: &str) -> Self {
        Self::new(parse_min_interval(query))
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start time of the last non-skipped run.
    pub fn last_run(&self) -> Option<Instant> {
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the interval and stamp the start time when running.
    pub fn try_acquire(&self) -> Permit {
        let now = Instant::now();
        let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = *last_run {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.interval {
                return Permit::Skip { elapsed };
            }
        }

        *last_run = Some(now);
        Permit::Run(now)
    }
}
