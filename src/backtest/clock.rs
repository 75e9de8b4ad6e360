//! Virtual clock driving simulated time

use super::types::NANOS_PER_MILLI;

/// Monotonic simulated time source bounded by `[start, end]`
///
/// The clock only moves through [`VirtualClock::advance_to`]; it never reads
/// wall-clock time. Backward moves are rejected and leave the clock unchanged.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    start_ns: i64,
    end_ns: Option<i64>,
    now_ns: i64,
}

impl VirtualClock {
    /// Create an unbounded clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock bounded by `[start_ns, end_ns]`, positioned at start
    pub fn with_bounds(start_ns: i64, end_ns: i64) -> Self {
        let mut clock = Self::new();
        clock.set_start_time(start_ns);
        clock.set_end_time(end_ns);
        clock
    }

    /// Set the lower bound and move the clock to it
    pub fn set_start_time(&mut self, start_ns: i64) {
        self.start_ns = start_ns;
        self.now_ns = start_ns;
    }

    /// Set the upper bound
    pub fn set_end_time(&mut self, end_ns: i64) {
        self.end_ns = Some(end_ns);
        if self.now_ns > end_ns {
            self.now_ns = end_ns.max(self.start_ns);
        }
    }

    /// Current simulated time in nanoseconds
    pub fn now_ns(&self) -> i64 {
        self.now_ns
    }

    /// Current simulated time in milliseconds
    pub fn now_ms(&self) -> i64 {
        self.now_ns / NANOS_PER_MILLI
    }

    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> Option<i64> {
        self.end_ns
    }

    /// Move the clock forward to `target_ns`
    ///
    /// Returns `false` without touching state when the target is in the past
    /// or beyond the end bound.
    pub fn advance_to(&mut self, target_ns: i64) -> bool {
        if target_ns < self.now_ns {
            return false;
        }
        if let Some(end) = self.end_ns {
            if target_ns > end {
                return false;
            }
        }
        self.now_ns = target_ns;
        true
    }

    /// Nanoseconds since start
    pub fn elapsed_ns(&self) -> i64 {
        self.now_ns - self.start_ns
    }

    /// Nanoseconds until end (zero when unbounded)
    pub fn remaining_ns(&self) -> i64 {
        self.end_ns.map(|end| end - self.now_ns).unwrap_or(0)
    }

    /// Fraction of the window elapsed, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        let Some(end) = self.end_ns else {
            return 0.0;
        };
        let span = end - self.start_ns;
        if span <= 0 {
            return 0.0;
        }
        (self.elapsed_ns() as f64 / span as f64).clamp(0.0, 1.0)
    }

    /// Rewind to the start bound
    pub fn reset(&mut self) {
        self.now_ns = self.start_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_and_progress() {
        let mut clock = VirtualClock::with_bounds(1_000_000_000, 5_000_000_000);
        assert_eq!(clock.progress(), 0.0);

        assert!(clock.advance_to(2_000_000_000));
        assert!((clock.progress() - 0.25).abs() < 1e-12);

        assert!(!clock.advance_to(1_500_000_000));
        assert_eq!(clock.now_ns(), 2_000_000_000);
    }

    #[test]
    fn test_progress_reaches_one_at_end() {
        let mut clock = VirtualClock::with_bounds(0, 100);
        assert!(clock.advance_to(100));
        assert_eq!(clock.progress(), 1.0);
        assert_eq!(clock.remaining_ns(), 0);
    }

    #[test]
    fn test_advance_beyond_end_rejected() {
        let mut clock = VirtualClock::with_bounds(0, 100);
        assert!(clock.advance_to(50));
        assert!(!clock.advance_to(101));
        assert_eq!(clock.now_ns(), 50);
    }

    #[test]
    fn test_advance_to_same_time_is_allowed() {
        let mut clock = VirtualClock::with_bounds(0, 100);
        assert!(clock.advance_to(10));
        assert!(clock.advance_to(10));
        assert_eq!(clock.now_ns(), 10);
    }

    #[test]
    fn test_monotonic_over_sequence() {
        let mut clock = VirtualClock::with_bounds(0, 1_000);
        let targets = [5, 3, 10, 10, 2, 999, 500, 1_000, 1_001];
        let mut last = clock.now_ns();
        for t in targets {
            let before = clock.now_ns();
            let moved = clock.advance_to(t);
            assert!(clock.now_ns() >= last);
            if !moved {
                assert_eq!(clock.now_ns(), before);
            }
            last = clock.now_ns();
        }
        assert_eq!(clock.now_ns(), 1_000);
    }

    #[test]
    fn test_reset_and_elapsed() {
        let mut clock = VirtualClock::with_bounds(1_000, 3_000);
        clock.advance_to(2_500);
        assert_eq!(clock.elapsed_ns(), 1_500);
        assert_eq!(clock.remaining_ns(), 500);
        clock.reset();
        assert_eq!(clock.now_ns(), 1_000);
        assert_eq!(clock.progress(), 0.0);
    }

    #[test]
    fn test_millisecond_accessor() {
        let mut clock = VirtualClock::with_bounds(0, 10_000_000_000);
        clock.advance_to(2_500_000_000);
        assert_eq!(clock.now_ms(), 2_500);
    }

    #[test]
    fn test_unbounded_progress_is_zero() {
        let mut clock = VirtualClock::new();
        assert!(clock.advance_to(42));
        assert_eq!(clock.progress(), 0.0);
    }
}
