//! Geometric interval growth for long recordings.

use std::time::Duration;

/// Ticks between two doublings.
pub const BACKOFF_THRESHOLD: u32 = 1000;
/// Interval multiplier applied at each threshold.
pub const BACKOFF_RATIO: u32 = 2;
/// Upper bound on the sampling interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Sampling interval that doubles every [`BACKOFF_THRESHOLD`] ticks, up to
/// [`MAX_INTERVAL`]. A disabled backoff always yields the base interval.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    enabled: bool,
    counter: u32,
}

impl Backoff {
    pub fn new(interval: Duration, enabled: bool) -> Self {
        Self {
            interval,
            enabled,
            counter: 0,
        }
    }

    /// Current interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Accounts for one completed tick and returns the interval until the
    /// next one.
    pub fn tick(&mut self) -> Duration {
        if !self.enabled {
            return self.interval;
        }

        self.counter += 1;
        if self.counter >= BACKOFF_THRESHOLD {
            self.counter -= BACKOFF_THRESHOLD;
            self.interval = self
                .interval
                .saturating_mul(BACKOFF_RATIO)
                .min(MAX_INTERVAL);
        }
        self.interval
    }
}
