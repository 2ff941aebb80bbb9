//! Fixed-rate video scheduler on the shared clock.

use micros_core::Clock;
use std::sync::Arc;
use std::time::Duration;

pub struct FrameTicker {
    clock: Arc<Clock>,
    period_micros: u64,
    next_deadline: u64,
    skipped: u64,
}

impl FrameTicker {
    pub fn new(clock: Arc<Clock>, fps: u32) -> Self {
        let period_micros = 1_000_000 / u64::from(fps.max(1));
        let next_deadline = clock.now_micros();
        Self {
            clock,
            period_micros,
            next_deadline,
            skipped: 0,
        }
    }

    pub fn period_micros(&self) -> u64 {
        self.period_micros
    }

    /// Frames dropped because the caller fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Sleeps until the next frame is due and returns its time.
    ///
    /// Frame times are multiples of the period from the first frame, so they
    /// strictly increase; frames whose time has fully passed are skipped.
    pub fn next_frame(&mut self) -> u64 {
        let now = self.clock.now_micros();
        if now >= self.next_deadline + self.period_micros {
            let behind = (now - self.next_deadline) / self.period_micros;
            self.skipped += behind;
            self.next_deadline += behind * self.period_micros;
            log::debug!("Video fell behind, skipped {} frames", behind);
        } else if now < self.next_deadline {
            std::thread::sleep(Duration::from_micros(self.next_deadline - now));
        }

        let frame_time = self.next_deadline;
        self.next_deadline += self.period_micros;
        frame_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micros_core::ManualTicks;

    #[test]
    fn frame_times_advance_by_whole_periods() {
        let ticks = Arc::new(ManualTicks::new(1_000_000));
        let clock = Arc::new(Clock::with_source(ticks.clone()).unwrap());
        let mut ticker = FrameTicker::new(clock, 50);
        assert_eq!(ticker.period_micros(), 20_000);

        assert_eq!(ticker.next_frame(), 0);
        ticks.advance(20_000);
        assert_eq!(ticker.next_frame(), 20_000);
        ticks.advance(25_000);
        assert_eq!(ticker.next_frame(), 40_000);
        assert_eq!(ticker.skipped(), 0);
    }

    #[test]
    fn late_frames_are_skipped() {
        let ticks = Arc::new(ManualTicks::new(1_000_000));
        let clock = Arc::new(Clock::with_source(ticks.clone()).unwrap());
        let mut ticker = FrameTicker::new(clock, 50);

        assert_eq!(ticker.next_frame(), 0);
        ticks.advance(95_000);
        assert_eq!(ticker.next_frame(), 80_000);
        assert_eq!(ticker.skipped(), 3);
        ticks.advance(5_000);
        assert_eq!(ticker.next_frame(), 100_000);
    }
}
