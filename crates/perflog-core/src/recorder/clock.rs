//! Time source for the sampling loop.
//!
//! The loop never sleeps directly: it asks a [`TickSource`] to wait until a
//! target instant, and the source reports whether the wait ran out or a stop
//! was requested first. [`RealClock`] blocks on the stop channel with a
//! timeout; [`VirtualClock`] jumps straight to the target so schedules can be
//! tested without sleeping.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The target instant was reached.
    Elapsed,
    /// A stop was requested before the target.
    Cancelled,
}

pub trait TickSource {
    fn now(&self) -> Instant;

    /// Blocks until `target` or a stop request, whichever comes first.
    /// A target in the past returns immediately unless a stop is pending.
    fn wait_until(&mut self, target: Instant) -> Wake;
}

/// Wall clock that wakes early when a message arrives on the stop channel.
pub struct RealClock {
    stop: Receiver<()>,
}

impl RealClock {
    pub fn new(stop: Receiver<()>) -> Self {
        Self { stop }
    }
}

impl TickSource for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_until(&mut self, target: Instant) -> Wake {
        let timeout = target.saturating_duration_since(Instant::now());
        match self.stop.recv_timeout(timeout) {
            Ok(()) => Wake::Cancelled,
            Err(RecvTimeoutError::Timeout) => Wake::Elapsed,
            Err(RecvTimeoutError::Disconnected) => {
                // No sender left, so no stop can arrive any more.
                thread::sleep(target.saturating_duration_since(Instant::now()));
                Wake::Elapsed
            }
        }
    }
}

/// Simulated clock: waiting advances time instantly.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    origin: Instant,
    now: Instant,
    cancel_at: Option<Instant>,
}

impl VirtualClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            now: origin,
            cancel_at: None,
        }
    }

    /// Requests a stop once `after` has passed since creation.
    pub fn cancel_after(mut self, after: Duration) -> Self {
        self.cancel_at = Some(self.origin + after);
        self
    }

    /// Simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        self.now - self.origin
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for VirtualClock {
    fn now(&self) -> Instant {
        self.now
    }

    fn wait_until(&mut self, target: Instant) -> Wake {
        if let Some(cancel_at) = self.cancel_at
            && cancel_at <= target
        {
            self.cancel_at = None;
            self.now = self.now.max(cancel_at);
            return Wake::Cancelled;
        }
        self.now = self.now.max(target);
        Wake::Elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn virtual_wait_jumps_to_target() {
        let mut clock = VirtualClock::new();
        let target = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.wait_until(target), Wake::Elapsed);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));

        // past targets do not move time backwards
        let past = clock.now() - Duration::from_secs(1);
        assert_eq!(clock.wait_until(past), Wake::Elapsed);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn virtual_cancel_fires_once() {
        let mut clock = VirtualClock::new().cancel_after(Duration::from_millis(1500));
        let t1 = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.wait_until(t1), Wake::Elapsed);
        let t2 = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.wait_until(t2), Wake::Cancelled);
        assert_eq!(clock.elapsed(), Duration::from_millis(1500));
        assert_eq!(clock.wait_until(t2), Wake::Elapsed);
    }

    #[test]
    fn real_clock_elapses_without_stop() {
        let (_tx, rx) = mpsc::channel();
        let mut clock = RealClock::new(rx);
        let target = clock.now() + Duration::from_millis(20);
        assert_eq!(clock.wait_until(target), Wake::Elapsed);
        assert!(Instant::now() >= target);
    }

    #[test]
    fn real_clock_wakes_on_stop() {
        let (tx, rx) = mpsc::channel();
        let mut clock = RealClock::new(rx);
        tx.send(()).unwrap();
        let target = clock.now() + Duration::from_secs(60);
        assert_eq!(clock.wait_until(target), Wake::Cancelled);
    }

    #[test]
    fn real_clock_survives_dropped_sender() {
        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        let mut clock = RealClock::new(rx);
        let target = clock.now() + Duration::from_millis(10);
        assert_eq!(clock.wait_until(target), Wake::Elapsed);
    }
}
