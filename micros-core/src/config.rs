//! Configuration for the audio engine

use crate::error::{MicrosError, Result};
use std::time::Duration;

/// How the engine is driven by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// The device invokes our callback once per hardware period.
    Callback,
    /// A dedicated loop thread renders fixed quanta and submits them with a blocking write.
    Push,
}

impl Default for EngineMode {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::Push
    }

    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Callback
    }
}

/// Configuration descriptor for the audio output engine
#[derive(Debug, Clone)]
pub struct AudioDesc {
    /// Sample rate the render contract is written for
    pub sample_rate: u32,
    /// Accepted distance between a device's nominal rate and `sample_rate`
    pub rate_tolerance_hz: f64,
    /// Number of output channels the render contract fills (always stereo)
    pub channels: u16,
    /// Callback or push-loop operation
    pub mode: EngineMode,
    /// Frames rendered per push-loop iteration
    pub push_quantum: Duration,
    /// Silence written to a push sink before the loop starts
    pub push_prefill: Duration,
    /// Largest device-vs-render drift applied to a playback timestamp
    pub max_drift: Duration,
    /// Consecutive position-query failures before an alarm is raised, at least 1
    pub position_alarm_after: u32,
    /// Capacity of the engine event queue
    pub event_capacity: usize,
}

impl Default for AudioDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            rate_tolerance_hz: 0.01,
            channels: 2,
            mode: EngineMode::default(),
            push_quantum: Duration::from_millis(25),
            push_prefill: Duration::from_secs(1),
            max_drift: Duration::from_millis(250),
            position_alarm_after: 64,
            event_capacity: 256,
        }
    }
}

impl AudioDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn push_quantum(mut self, quantum: Duration) -> Self {
        self.push_quantum = quantum;
        self
    }

    pub fn push_prefill(mut self, prefill: Duration) -> Self {
        self.push_prefill = prefill;
        self
    }

    pub fn max_drift(mut self, max_drift: Duration) -> Self {
        self.max_drift = max_drift;
        self
    }

    pub fn position_alarm_after(mut self, failures: u32) -> Self {
        self.position_alarm_after = failures;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Number of frames covering `duration` at the configured sample rate.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_micros() * self.sample_rate as u128 / 1_000_000) as usize
    }

    /// Frames per push-loop iteration.
    pub fn push_quantum_frames(&self) -> usize {
        self.frames_for(self.push_quantum)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(MicrosError::Configuration(
                "Sample rate must be greater than 0".into(),
            ));
        }
        if self.channels != 2 {
            return Err(MicrosError::Configuration(format!(
                "Only stereo output is supported, got {} channels",
                self.channels
            )));
        }
        if self.rate_tolerance_hz.is_nan() || self.rate_tolerance_hz < 0.0 {
            return Err(MicrosError::Configuration(
                "Rate tolerance must be a non-negative number".into(),
            ));
        }
        if self.mode == EngineMode::Push && self.push_quantum_frames() == 0 {
            return Err(MicrosError::Configuration(
                "Push quantum must cover at least one frame".into(),
            ));
        }
        if self.position_alarm_after == 0 {
            return Err(MicrosError::Configuration(
                "Position alarm threshold must be at least 1 failure".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(MicrosError::Configuration(
                "Event capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_48khz_stereo() {
        let desc = AudioDesc::default();
        assert_eq!(desc.sample_rate, 48000);
        assert_eq!(desc.channels, 2);
        assert_eq!(desc.rate_tolerance_hz, 0.01);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn push_quantum_is_25ms_of_frames() {
        let desc = AudioDesc::default();
        assert_eq!(desc.push_quantum_frames(), 1200);
        assert_eq!(desc.frames_for(desc.push_prefill), 48000);
    }

    #[test]
    fn rejects_non_stereo() {
        let desc = AudioDesc {
            channels: 6,
            ..Default::default()
        };
        assert!(matches!(
            desc.validate(),
            Err(MicrosError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_empty_push_quantum() {
        let desc = AudioDesc::new()
            .mode(EngineMode::Push)
            .push_quantum(Duration::from_nanos(10));
        assert!(desc.validate().is_err());

        // the quantum is irrelevant in callback mode
        let desc = desc.mode(EngineMode::Callback);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn rejects_nan_tolerance() {
        let desc = AudioDesc {
            rate_tolerance_hz: f64::NAN,
            ..Default::default()
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn rejects_zero_position_alarm() {
        let desc = AudioDesc::new().position_alarm_after(0);
        assert!(matches!(
            desc.validate(),
            Err(MicrosError::Configuration(_))
        ));
        assert!(desc.position_alarm_after(1).validate().is_ok());
    }
}
