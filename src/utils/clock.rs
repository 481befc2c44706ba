//! Monotonic + wall clock helpers. Uses `quanta` for cheap monotonic reads
//! on the hot per-message path.

use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use quanta::Clock;

static CLOCK: Lazy<Clock> = Lazy::new(Clock::new);

/// A cheap monotonic instant, suitable for measuring query/connection
/// durations without a syscall on platforms `quanta` has TSC support for.
pub fn monotonic_now() -> quanta::Instant {
    CLOCK.now()
}

/// Milliseconds since the Unix epoch, used for stats timestamps that need
/// to be comparable across process restarts (unlike a monotonic instant).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn elapsed_ms(start: quanta::Instant) -> f64 {
    CLOCK.now().duration_since(start).as_secs_f64() * 1000.0
}
