//! Demo content: a once-per-second beep and a matching screen flash.
//!
//! Both halves derive everything from the timestamps they are given, so the
//! beep is heard exactly when the flash is shown.

use micros_core::{AudioRenderer, Display, VideoRenderer};
use std::f64::consts::TAU;

const SAMPLE_RATE: f64 = 48000.0;

/// When beeps happen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeepSchedule {
    pub period_micros: u64,
    pub length_micros: u64,
}

impl Default for BeepSchedule {
    fn default() -> Self {
        Self {
            period_micros: 1_000_000,
            length_micros: 100_000,
        }
    }
}

impl BeepSchedule {
    pub fn is_active(&self, time_micros: u64) -> bool {
        time_micros % self.period_micros < self.length_micros
    }

    /// Index of the beep period containing `time_micros`.
    pub fn period_index(&self, time_micros: u64) -> u64 {
        time_micros / self.period_micros
    }
}

pub struct Beep {
    schedule: BeepSchedule,
    frequency: f64,
    amplitude: f64,
}

impl Beep {
    pub fn new(schedule: BeepSchedule, frequency: f64, amplitude: f64) -> Self {
        Self {
            schedule,
            frequency,
            amplitude,
        }
    }
}

impl AudioRenderer for Beep {
    fn render_next_audio_frame(&mut self, time_micros: u64, left: &mut [f64], right: &mut [f64]) {
        for (frame, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let time = time_micros + (frame as f64 * 1_000_000.0 / SAMPLE_RATE) as u64;
            let sample = if self.schedule.is_active(time) {
                (TAU * self.frequency * time as f64 / 1_000_000.0).sin() * self.amplitude
            } else {
                0.0
            };
            *l = sample;
            *r = sample;
        }
    }
}

/// Logs a flash on the first frame of every beep period.
pub struct Flash {
    schedule: BeepSchedule,
    last_period: Option<u64>,
    frames: u64,
    flashes: u64,
}

impl Flash {
    pub fn new(schedule: BeepSchedule) -> Self {
        Self {
            schedule,
            last_period: None,
            frames: 0,
            flashes: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flashes(&self) -> u64 {
        self.flashes
    }
}

impl VideoRenderer for Flash {
    fn render_next_video_frame(&mut self, time_micros: u64, display: Display) {
        self.frames += 1;
        let period = self.schedule.period_index(time_micros);
        if self.schedule.is_active(time_micros) && self.last_period != Some(period) {
            self.last_period = Some(period);
            self.flashes += 1;
            log::info!(
                "Flash #{} at {} us ({}x{})",
                self.flashes,
                time_micros,
                display.framebuffer_width_px,
                display.framebuffer_height_px
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beep_is_silent_between_beeps() {
        let mut beep = Beep::new(BeepSchedule::default(), 440.0, 0.5);
        let mut left = [1.0; 48];
        let mut right = [1.0; 48];

        beep.render_next_audio_frame(500_000, &mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));

        beep.render_next_audio_frame(1_010_000, &mut left, &mut right);
        assert!(left.iter().any(|s| *s != 0.0));
        assert_eq!(left, right);
        assert!(left.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn flash_fires_once_per_period() {
        let mut flash = Flash::new(BeepSchedule::default());
        let display = Display::default();
        for frame in 0..120u64 {
            flash.render_next_video_frame(frame * 16_667, display);
        }
        assert_eq!(flash.frames(), 120);
        // periods starting at 0 s and 1 s
        assert_eq!(flash.flashes(), 2);
    }
}
