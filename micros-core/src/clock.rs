//! Process-wide monotonic time base.
//!
//! A [`Clock`] is an immutable snapshot of a tick source's frequency and the
//! tick captured at initialisation. It is shared as `Arc<Clock>` between the
//! audio callback and the video scheduler; reads never lock.

use crate::error::{MicrosError, Result};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// A monotonic hardware counter.
pub trait TickSource: Send + Sync {
    /// Ticks per second.
    fn frequency(&self) -> u64;

    /// Current counter value. Must never decrease.
    fn ticks(&self) -> u64;
}

/// Nanosecond ticks from `std::time::Instant`, counted from a process-wide anchor.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicTicks;

fn process_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

impl TickSource for MonotonicTicks {
    fn frequency(&self) -> u64 {
        1_000_000_000
    }

    fn ticks(&self) -> u64 {
        // u64 nanoseconds overflow after ~584 years of uptime
        process_anchor().elapsed().as_nanos() as u64
    }
}

/// Manually advanced ticks for simulation and tests.
#[derive(Debug)]
pub struct ManualTicks {
    frequency: u64,
    now: AtomicU64,
}

impl ManualTicks {
    pub fn new(frequency: u64) -> Self {
        Self {
            frequency,
            now: AtomicU64::new(0),
        }
    }

    /// Advances the counter by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::AcqRel);
    }

    /// Moves the counter to `ticks`; earlier values are ignored to stay monotonic.
    pub fn set(&self, ticks: u64) {
        self.now.fetch_max(ticks, Ordering::AcqRel);
    }
}

impl TickSource for ManualTicks {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn ticks(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

impl<T: TickSource + ?Sized> TickSource for std::sync::Arc<T> {
    fn frequency(&self) -> u64 {
        (**self).frequency()
    }

    fn ticks(&self) -> u64 {
        (**self).ticks()
    }
}

/// Shared monotonic clock.
pub struct Clock {
    source: Box<dyn TickSource>,
    frequency: u64,
    origin: u64,
}

impl Clock {
    /// Creates a clock over the platform's monotonic counter.
    pub fn init() -> Result<Self> {
        Self::with_source(MonotonicTicks)
    }

    /// Creates a clock over an arbitrary tick source, capturing its origin tick now.
    pub fn with_source(source: impl TickSource + 'static) -> Result<Self> {
        let frequency = source.frequency();
        if frequency == 0 {
            return Err(MicrosError::ClockUnavailable(
                "tick source reports a frequency of 0 Hz".into(),
            ));
        }
        let origin = source.ticks();
        log::debug!("Clock initialised: {} Hz, origin tick {}", frequency, origin);
        Ok(Self {
            source: Box::new(source),
            frequency,
            origin,
        })
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Raw tick count of the underlying source.
    pub fn ticks(&self) -> u64 {
        self.source.ticks()
    }

    /// Converts a raw tick count into microseconds since the clock's origin.
    ///
    /// Ticks before the origin map to 0. The result truncates towards zero and is
    /// exact whenever the frequency divides 1e6.
    pub fn ticks_to_micros(&self, ticks: u64) -> u64 {
        let elapsed = ticks.saturating_sub(self.origin) as u128;
        let micros = elapsed * MICROS_PER_SECOND / self.frequency as u128;
        u64::try_from(micros).unwrap_or(u64::MAX)
    }

    pub fn now_micros(&self) -> u64 {
        self.ticks_to_micros(self.ticks())
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("frequency", &self.frequency)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_frequency_is_unavailable() {
        let err = Clock::with_source(ManualTicks::new(0)).unwrap_err();
        assert!(matches!(err, MicrosError::ClockUnavailable(_)));
    }

    #[test]
    fn conversion_is_exact_for_divisors_of_a_million() {
        for frequency in [1, 1_000, 250_000, 1_000_000] {
            let clock = Clock::with_source(ManualTicks::new(frequency)).unwrap();
            assert_eq!(clock.ticks_to_micros(5), 5 * 1_000_000 / frequency);
            assert_eq!(clock.ticks_to_micros(frequency), 1_000_000);
        }
    }

    #[test]
    fn conversion_truncates_otherwise() {
        let clock = Clock::with_source(ManualTicks::new(3)).unwrap();
        assert_eq!(clock.ticks_to_micros(1), 333_333);
        assert_eq!(clock.ticks_to_micros(2), 666_666);
    }

    #[test]
    fn wide_arithmetic_does_not_overflow() {
        let clock = Clock::with_source(ManualTicks::new(1_000_000_000)).unwrap();
        // ticks * 1e6 would overflow a u64 here
        let ticks = u64::MAX / 2;
        assert_eq!(clock.ticks_to_micros(ticks), ticks / 1_000);
    }

    #[test]
    fn conversion_is_monotonic() {
        let clock = Clock::with_source(ManualTicks::new(24_000_000)).unwrap();
        let samples = [0u64, 1, 23, 24, 25, 999_999, 1_000_000, 24_000_001, u64::MAX];
        for pair in samples.windows(2) {
            assert!(clock.ticks_to_micros(pair[0]) <= clock.ticks_to_micros(pair[1]));
        }
    }

    #[test]
    fn origin_is_captured_at_init() {
        let ticks = Arc::new(ManualTicks::new(1_000));
        ticks.set(10);
        let clock = Clock::with_source(ticks.clone()).unwrap();
        assert_eq!(clock.origin(), 10);
        assert_eq!(clock.now_micros(), 0);
        assert_eq!(clock.ticks_to_micros(4), 0);

        ticks.advance(3);
        assert_eq!(clock.now_micros(), 3_000);
    }

    #[test]
    fn manual_ticks_never_go_backwards() {
        let ticks = ManualTicks::new(1_000);
        ticks.set(50);
        ticks.set(20);
        assert_eq!(ticks.ticks(), 50);
    }

    #[test]
    fn successive_reads_never_decrease() {
        let clock = Clock::init().unwrap();
        let mut previous = clock.now_micros();
        for _ in 0..10_000 {
            let now = clock.now_micros();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn clock_is_shareable_across_threads() {
        let clock = Arc::new(Clock::init().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    let first = clock.now_micros();
                    let second = clock.now_micros();
                    second >= first
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
