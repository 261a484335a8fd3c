//! Wall-clock aligned wake-ups.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Next exact multiple of `period` strictly after `now`, both measured from
/// the unix epoch. A `now` already on a multiple moves a full period ahead.
pub fn next_aligned(now: Duration, period: Duration) -> Duration {
    let period_ns = period.as_nanos().max(1);
    let next_ns = (now.as_nanos() / period_ns + 1) * period_ns;
    let secs = u64::try_from(next_ns / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (next_ns % 1_000_000_000) as u32)
}

/// Delay from `now` to [`next_aligned`].
pub fn delay_until_next(now: Duration, period: Duration) -> Duration {
    next_aligned(now, period).saturating_sub(now)
}

/// Delay from the current wall-clock time to the next multiple of `period`.
pub fn until_next(period: Duration) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    delay_until_next(now, period)
}
