//! Absolute-time cycle scheduler.
//!
//! Deadlines are `anchor + n × period`, never `last_wake + period`, so sleep
//! overshoot does not accumulate. A late cycle does not sleep and nothing is
//! skipped: the loop simply runs the following cycles back to back until it
//! is on schedule again.

use std::thread;
use std::time::{Duration, Instant};

/// What happened at the end of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Finished early and slept for this long.
    Slept(Duration),
    /// Finished this long after the deadline; no sleep.
    Overran(Duration),
}

#[derive(Debug)]
pub struct CycleClock {
    anchor: Instant,
    period: Duration,
    iteration: u64,
}

impl CycleClock {
    /// Start a clock anchored at the current instant.
    pub fn start(period: Duration) -> Self {
        Self {
            anchor: Instant::now(),
            period,
            iteration: 0,
        }
    }

    /// Cycles completed so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Offset from the anchor at which cycle `iteration` is due to end.
    pub fn deadline(&self, iteration: u64) -> Duration {
        let nanos = self.period.as_nanos() * iteration as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Close out the current cycle, sleeping until its deadline if there is time left.
    pub fn wait(&mut self) -> Pacing {
        self.iteration += 1;
        let pacing = pace(self.anchor.elapsed(), self.deadline(self.iteration));
        if let Pacing::Slept(remaining) = pacing {
            thread::sleep(remaining);
        }
        pacing
    }
}

/// Sleep decision for a cycle that ends at `elapsed` against `deadline`.
pub fn pace(elapsed: Duration, deadline: Duration) -> Pacing {
    match deadline.checked_sub(elapsed) {
        Some(remaining) if !remaining.is_zero() => Pacing::Slept(remaining),
        _ => Pacing::Overran(elapsed - deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_sleeps_for_remainder_only() {
        let ms = Duration::from_millis;
        assert_eq!(pace(ms(5), ms(16)), Pacing::Slept(ms(11)));
        assert_eq!(pace(ms(20), ms(16)), Pacing::Overran(ms(4)));
        assert_eq!(pace(ms(16), ms(16)), Pacing::Overran(Duration::ZERO));
    }

    #[test]
    fn deadlines_are_multiples_of_period() {
        let clock = CycleClock::start(Duration::from_nanos(16_666_667));
        assert_eq!(clock.deadline(0), Duration::ZERO);
        assert_eq!(clock.deadline(60), Duration::from_nanos(1_000_000_020));
        assert_eq!(clock.deadline(3), Duration::from_nanos(50_000_001));
    }

    #[test]
    fn wait_does_not_drift_with_slow_cycles() {
        let period = Duration::from_millis(5);
        let mut clock = CycleClock::start(period);
        let begin = Instant::now();

        // Cycle 2 overruns by 8 ms; cycles 3 and 4 should not sleep a full period.
        clock.wait();
        thread::sleep(Duration::from_millis(13));
        assert!(matches!(clock.wait(), Pacing::Overran(_)));
        for _ in 0..8 {
            clock.wait();
        }

        let elapsed = begin.elapsed();
        assert_eq!(clock.iteration(), 10);
        assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");
    }
}
