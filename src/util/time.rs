//! Time utilities for the race simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Monotonic millisecond clock read by the session driver.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Clock anchored at construction time
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Lap timing collaborator.
///
/// Times are supplied by the caller so that lap durations stay reproducible
/// when the session is driven from a recorded or synthetic clock.
#[derive(Debug, Clone, Default)]
pub struct LapTimer {
    lap_start_ms: Option<f64>,
    last_lap_ms: Option<f64>,
    best_lap_ms: Option<f64>,
}

impl LapTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin timing a lap at `now_ms`
    pub fn start_lap(&mut self, now_ms: f64) {
        self.lap_start_ms = Some(now_ms);
    }

    /// Finish the running lap and immediately start the next one.
    /// Returns the lap duration in milliseconds, or `None` when no lap was
    /// being timed; last and best are left alone in that case.
    pub fn complete_lap(&mut self, now_ms: f64) -> Option<f64> {
        let start = self.lap_start_ms.replace(now_ms)?;
        let duration = (now_ms - start).max(0.0);

        self.last_lap_ms = Some(duration);
        self.best_lap_ms = Some(match self.best_lap_ms {
            Some(best) if best <= duration => best,
            _ => duration,
        });

        Some(duration)
    }

    pub fn is_running(&self) -> bool {
        self.lap_start_ms.is_some()
    }

    pub fn last_lap_ms(&self) -> Option<f64> {
        self.last_lap_ms
    }

    pub fn best_lap_ms(&self) -> Option<f64> {
        self.best_lap_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lap_tracks_last_and_best() {
        let mut timer = LapTimer::new();
        timer.start_lap(1_000.0);

        assert_eq!(timer.complete_lap(31_000.0), Some(30_000.0));
        assert_eq!(timer.complete_lap(56_000.0), Some(25_000.0));
        assert_eq!(timer.complete_lap(90_000.0), Some(34_000.0));

        assert_eq!(timer.last_lap_ms(), Some(34_000.0));
        assert_eq!(timer.best_lap_ms(), Some(25_000.0));
    }

    #[test]
    fn test_complete_without_start_records_nothing() {
        let mut timer = LapTimer::new();
        assert_eq!(timer.complete_lap(500.0), None);
        assert_eq!(timer.last_lap_ms(), None);
        assert_eq!(timer.best_lap_ms(), None);

        // The failed completion starts timing from that moment
        assert!(timer.is_running());
        assert_eq!(timer.complete_lap(1_500.0), Some(1_000.0));
    }

    #[test]
    fn test_monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
