//! Query text placeholders.

use std::time::Duration;

/// Replaced with the process start time in unix seconds.
pub const UNIX_START_TIME: &str = "UNIX_START_TIME";

/// Replaced with the refresh interval in whole seconds.
pub const REFRESH_RATE_SEC: &str = "REFRESH_RATE_SEC";

/// Values substituted into query text before a collector is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    start_time: i64,
    refresh_secs: u64,
}

impl TemplateVars {
    /// Capture the current time as the start time.
    pub fn new(refresh: Duration) -> Self {
        Self::with_start_time(chrono::Utc::now().timestamp(), refresh)
    }

    /// Use an explicit start time.
    pub fn with_start_time(start_time: i64, refresh: Duration) -> Self {
        Self {
            start_time,
            refresh_secs: refresh.as_secs(),
        }
    }

    /// Replace every placeholder occurrence in `query`.
    pub fn render(&self, query: &str) -> String {
        query
            .replace(UNIX_START_TIME, &self.start_time.to_string())
            .replace(REFRESH_RATE_SEC, &self.refresh_secs.to_string())
    }
}
