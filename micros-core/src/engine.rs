//! Callback engine: turns hardware output periods into render contract calls.

use crate::backend::{DevicePosition, HardwareBuffer, OutputHandler};
use crate::clock::Clock;
use crate::config::AudioDesc;
use crate::events::{EventSender, MicrosEvent};
use crate::format::ChannelMap;
use crate::render::AudioRenderer;
use crate::router::{self, ChannelRouter};
use cpal::{FromSample, Sample};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

const INITIAL_BUFFER_FRAMES: usize = 4096;

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    /// Terminal; the device has been released.
    Stopped,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Counters updated by the audio thread.
#[derive(Debug, Default)]
pub struct EngineStats {
    rendered_frames: AtomicU64,
    invocations: AtomicU64,
    skipped_invocations: AtomicU64,
    underruns: AtomicU64,
    recovery_failures: AtomicU64,
    position_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    pub rendered_frames: u64,
    pub invocations: u64,
    pub skipped_invocations: u64,
    pub underruns: u64,
    pub recovery_failures: u64,
    pub position_fallbacks: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            rendered_frames: self.rendered_frames.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            skipped_invocations: self.skipped_invocations.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            recovery_failures: self.recovery_failures.load(Ordering::Relaxed),
            position_fallbacks: self.position_fallbacks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery_failure(&self) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between an engine and its host.
#[derive(Debug, Default)]
pub struct EngineStatus {
    state: AtomicU8,
    stats: EngineStats,
}

impl EngineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Idle -> Running. Returns false from any other state.
    pub fn start(&self) -> bool {
        self.state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to Stopped and returns the previous state.
    pub fn stop(&self) -> EngineState {
        EngineState::from_u8(self.state.swap(2, Ordering::AcqRel))
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

/// Per-invocation scratch region handed to the render contract.
#[derive(Debug)]
pub struct CallbackBuffer {
    left: Vec<f64>,
    right: Vec<f64>,
}

impl CallbackBuffer {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
        }
    }

    /// Resizes both channels to `frames` zeroed samples.
    pub fn prepare(&mut self, frames: usize) {
        self.left.clear();
        self.left.resize(frames, 0.0);
        self.right.clear();
        self.right.resize(frames, 0.0);
    }

    pub fn left(&self) -> &[f64] {
        &self.left
    }

    pub fn right(&self) -> &[f64] {
        &self.right
    }

    pub fn frame_count(&self) -> usize {
        self.left.len()
    }
}

/// Drives one render contract from hardware periods.
///
/// The engine is moved into the audio thread (the device callback or the push
/// loop) and owned by it exclusively; the host observes it through
/// [`EngineStatus`] and the event queue.
pub struct CallbackEngine<R> {
    renderer: R,
    clock: Arc<Clock>,
    router: ChannelRouter,
    sample_rate: u32,
    rendered_frames: u64,
    last_timestamp: Option<u64>,
    buffer: CallbackBuffer,
    max_drift_micros: i64,
    position_alarm_after: u32,
    position_failures: u32,
    status: Arc<EngineStatus>,
    events: EventSender,
}

impl<R: AudioRenderer> CallbackEngine<R> {
    pub fn new(
        renderer: R,
        clock: Arc<Clock>,
        channel_map: ChannelMap,
        desc: &AudioDesc,
        status: Arc<EngineStatus>,
        events: EventSender,
    ) -> Self {
        Self {
            renderer,
            clock,
            router: ChannelRouter::new(channel_map),
            sample_rate: desc.sample_rate,
            rendered_frames: 0,
            last_timestamp: None,
            buffer: CallbackBuffer::with_capacity(INITIAL_BUFFER_FRAMES),
            max_drift_micros: i64::try_from(desc.max_drift.as_micros()).unwrap_or(i64::MAX),
            position_alarm_after: desc.position_alarm_after,
            position_failures: 0,
            status,
            events,
        }
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames
    }

    pub fn status(&self) -> &Arc<EngineStatus> {
        &self.status
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Microseconds of audio rendered so far.
    pub fn rendered_micros(&self) -> u64 {
        let micros = self.rendered_frames as u128 * 1_000_000 / self.sample_rate as u128;
        u64::try_from(micros).unwrap_or(u64::MAX)
    }

    /// Difference between the render timeline and what the device has played.
    ///
    /// Returns `None` when the device could not report its position.
    fn device_drift(&self, position: DevicePosition) -> Option<i64> {
        match position {
            DevicePosition::Played(played) => {
                Some(self.rendered_micros() as i64 - played.min(i64::MAX as u64) as i64)
            }
            DevicePosition::Latency(latency) => {
                Some(i64::try_from(latency.as_micros()).unwrap_or(i64::MAX))
            }
            DevicePosition::Unavailable => None,
        }
    }

    /// Time, in the clock's domain, at which the next rendered sample will be audible.
    ///
    /// Without a device position the undriven clock is used. Drift is clamped to
    /// the configured bound, and successive results strictly increase.
    pub fn playback_timestamp(&mut self, position: DevicePosition) -> u64 {
        let drift = match self.device_drift(position) {
            Some(drift) => {
                self.position_failures = 0;
                drift
            }
            None => {
                self.position_failures = self.position_failures.saturating_add(1);
                self.status
                    .stats
                    .position_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
                if self.position_failures == self.position_alarm_after {
                    self.events.emit(MicrosEvent::PositionUnavailable {
                        consecutive: self.position_failures,
                    });
                }
                0
            }
        };

        let clamped = drift.clamp(-self.max_drift_micros, self.max_drift_micros);
        if clamped != drift {
            self.events.emit(MicrosEvent::DriftClamped {
                drift_micros: drift,
            });
        }

        let mut timestamp = self.clock.now_micros().saturating_add_signed(clamped);
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + 1;
            }
        }
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Renders one hardware period into `buffers`.
    ///
    /// Returns the number of frames rendered, or `None` when the period was
    /// filled with silence (engine not running, or the buffers could not be routed).
    pub fn process<T>(
        &mut self,
        buffers: &mut [HardwareBuffer<'_, T>],
        position: DevicePosition,
    ) -> Option<usize>
    where
        T: Sample + FromSample<f64>,
    {
        router::silence(buffers);
        if !self.status.is_running() {
            return None;
        }

        let stats = &self.status.stats;
        stats.invocations.fetch_add(1, Ordering::Relaxed);

        let binding = match self.router.route(buffers) {
            Ok(binding) => binding,
            Err(err) => {
                stats.skipped_invocations.fetch_add(1, Ordering::Relaxed);
                self.events.emit(MicrosEvent::InvocationSkipped {
                    reason: err.into(),
                });
                return None;
            }
        };

        let frame_count = binding.frame_count();
        let timestamp = self.playback_timestamp(position);

        self.buffer.prepare(frame_count);
        self.renderer.render_next_audio_frame(
            timestamp,
            &mut self.buffer.left,
            &mut self.buffer.right,
        );

        router::write_channel(buffers, &binding.left, &self.buffer.left);
        router::write_channel(buffers, &binding.right, &self.buffer.right);

        self.rendered_frames += frame_count as u64;
        self.status
            .stats
            .rendered_frames
            .fetch_add(frame_count as u64, Ordering::Relaxed);
        Some(frame_count)
    }
}

impl<R, T> OutputHandler<T> for CallbackEngine<R>
where
    R: AudioRenderer,
    T: Sample + FromSample<f64>,
{
    fn on_output(&mut self, buffers: &mut [HardwareBuffer<'_, T>], position: DevicePosition) {
        self.process(buffers, position);
    }
}
