//! Push-mode output: a dedicated thread renders fixed quanta and writes them
//! into a blocking interleaved-stereo sink.
//!
//! Used on platforms without a pull-style callback. Each quantum goes through
//! the same [`CallbackEngine`] as a hardware callback would, with the sink's
//! reported delay as the device position.

use crate::backend::{DevicePosition, HardwareBuffer};
use crate::engine::CallbackEngine;
use crate::error::{MicrosError, Result};
use crate::events::MicrosEvent;
use crate::render::AudioRenderer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The device ran out of audio before the write arrived
    Underrun,
    /// The device did not accept data within the write timeout
    Busy,
    Device(String),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Underrun => write!(f, "output underrun"),
            Self::Busy => write!(f, "output device busy"),
            Self::Device(msg) => write!(f, "output device error: {}", msg),
        }
    }
}

impl std::error::Error for WriteError {}

/// Blocking interleaved-stereo f32 output.
pub trait PushSink: Send {
    /// Writes interleaved stereo samples, blocking until the device has taken
    /// them. Returns the number of frames accepted.
    fn write(&mut self, samples: &[f32]) -> std::result::Result<usize, WriteError>;

    /// Brings the device back into a writable state after `error`.
    fn recover(&mut self, error: &WriteError) -> std::result::Result<(), WriteError>;

    /// Delay until the next written frame is audible.
    fn position(&mut self) -> DevicePosition;

    fn close(&mut self);
}

/// Handle to the push thread.
pub struct PushLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PushLoop {
    /// Spawns the push thread. The sink is prefilled with `prefill_frames` of
    /// silence before the first rendered quantum.
    pub fn spawn<R, S>(
        engine: CallbackEngine<R>,
        sink: S,
        quantum_frames: usize,
        prefill_frames: usize,
    ) -> Result<Self>
    where
        R: AudioRenderer + 'static,
        S: PushSink + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let worker = PushWorker {
            engine,
            sink,
            scratch: vec![0.0; quantum_frames.max(1) * 2],
            running: running.clone(),
        };

        let handle = thread::Builder::new()
            .name("micros-push".into())
            .spawn(move || worker.run(prefill_frames))
            .map_err(|e| MicrosError::Engine(format!("Failed to spawn push thread: {}", e)))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stops the thread and waits for it to close the sink. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Push thread panicked");
            }
        }
    }
}

impl Drop for PushLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PushWorker<R, S> {
    engine: CallbackEngine<R>,
    sink: S,
    scratch: Vec<f32>,
    running: Arc<AtomicBool>,
}

impl<R: AudioRenderer, S: PushSink> PushWorker<R, S> {
    fn run(mut self, prefill_frames: usize) {
        log::debug!(
            "Push thread started ({} frame quantum, {} frame prefill)",
            self.quantum_frames(),
            prefill_frames
        );

        self.prefill(prefill_frames);

        while self.running.load(Ordering::Acquire) {
            let position = self.sink.position();
            {
                let mut buffers = [HardwareBuffer::new(&mut self.scratch[..], 2)];
                self.engine.process(&mut buffers, position);
            }
            let samples = std::mem::take(&mut self.scratch);
            self.write_with_recovery(&samples);
            self.scratch = samples;
        }

        self.sink.close();
        log::debug!(
            "Push thread stopped after {} frames",
            self.engine.rendered_frames()
        );
    }

    fn quantum_frames(&self) -> usize {
        self.scratch.len() / 2
    }

    fn prefill(&mut self, frames: usize) {
        let silence = vec![0.0f32; self.scratch.len()];
        let mut remaining = frames;
        while remaining > 0 && self.running.load(Ordering::Acquire) {
            let chunk = remaining.min(self.quantum_frames());
            self.write_with_recovery(&silence[..chunk * 2]);
            remaining -= chunk;
        }
    }

    /// Writes `samples`; on failure runs the recovery primitive once and retries once.
    fn write_with_recovery(&mut self, samples: &[f32]) {
        let frames = samples.len() / 2;
        let err = match self.sink.write(samples) {
            Ok(written) => {
                self.check_short_write(written, frames);
                return;
            }
            Err(err) => err,
        };

        let stats = self.engine.status().stats();
        if err == WriteError::Underrun {
            stats.record_underrun();
            self.engine.events().emit(MicrosEvent::Underrun);
        }
        log::warn!("Push write of {} frames failed: {}", frames, err);

        match self
            .sink
            .recover(&err)
            .and_then(|()| self.sink.write(samples))
        {
            Ok(written) => self.check_short_write(written, frames),
            Err(err) => {
                log::error!("Push write of {} frames failed after recovery: {}", frames, err);
                self.engine.status().stats().record_recovery_failure();
                self.engine
                    .events()
                    .emit(MicrosEvent::RecoveryFailed { frames });
            }
        }
    }

    fn check_short_write(&self, written: usize, frames: usize) {
        if written < frames {
            log::warn!("Short push write: {} of {} frames", written, frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedPushSink, SinkLog};
    use crate::clock::{Clock, ManualTicks};
    use crate::config::AudioDesc;
    use crate::engine::EngineStatus;
    use crate::events::EventQueue;
    use crate::format::ChannelMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Harness {
        status: Arc<EngineStatus>,
        events: EventQueue,
        log: Arc<Mutex<SinkLog>>,
    }

    fn spawn(sink: SimulatedPushSink, prefill_frames: usize) -> (PushLoop, Harness) {
        let clock = Arc::new(Clock::with_source(ManualTicks::new(1_000_000)).unwrap());
        let status = Arc::new(EngineStatus::new());
        let events = EventQueue::new(64);
        let engine = CallbackEngine::new(
            |_: u64, left: &mut [f64], right: &mut [f64]| {
                left.fill(1.0);
                right.fill(-1.0);
            },
            clock,
            ChannelMap::stereo(),
            &AudioDesc::default(),
            status.clone(),
            events.sender(),
        );
        status.start();

        let log = sink.log();
        let push = PushLoop::spawn(engine, sink, 4, prefill_frames).unwrap();
        (
            push,
            Harness {
                status,
                events,
                log,
            },
        )
    }

    fn wait_for(log: &Arc<Mutex<SinkLog>>, writes: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while log.lock().unwrap().writes < writes {
            assert!(Instant::now() < deadline, "sink never saw {} writes", writes);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn prefills_silence_before_rendered_quanta() {
        let (mut push, harness) = spawn(SimulatedPushSink::new(), 8);
        wait_for(&harness.log, 4);
        push.stop();

        let log = harness.log.lock().unwrap();
        assert!(log.closed);
        assert!(log.samples[..16].iter().all(|s| *s == 0.0));
        assert_eq!(&log.samples[16..24], &[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
        assert!(harness.status.stats().snapshot().rendered_frames >= 8);
    }

    #[test]
    fn underrun_recovers_and_retries_once() {
        let sink = SimulatedPushSink::new();
        sink.fail_next(WriteError::Underrun);
        let (mut push, harness) = spawn(sink, 0);
        wait_for(&harness.log, 2);
        push.stop();

        let log = harness.log.lock().unwrap();
        assert_eq!(log.recoveries, vec![WriteError::Underrun]);
        // the retried quantum landed in the sink
        assert_eq!(&log.samples[..2], &[1.0, -1.0]);

        let stats = harness.status.stats().snapshot();
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.recovery_failures, 0);
        assert!(harness.events.poll().contains(&MicrosEvent::Underrun));
    }

    #[test]
    fn failed_retry_is_reported_and_the_loop_continues() {
        let sink = SimulatedPushSink::new();
        sink.fail_next(WriteError::Device("unplugged".into()));
        sink.fail_next(WriteError::Device("unplugged".into()));
        let (mut push, harness) = spawn(sink, 0);
        wait_for(&harness.log, 2);
        push.stop();

        assert_eq!(harness.status.stats().snapshot().recovery_failures, 1);
        assert_eq!(harness.status.stats().snapshot().underruns, 0);
        assert!(
            harness
                .events
                .poll()
                .contains(&MicrosEvent::RecoveryFailed { frames: 4 })
        );
    }

    #[test]
    fn failed_recovery_skips_the_retry() {
        let sink = SimulatedPushSink::new();
        sink.fail_next(WriteError::Busy);
        sink.fail_recovery(true);
        let (mut push, harness) = spawn(sink, 0);
        wait_for(&harness.log, 1);
        push.stop();

        let log = harness.log.lock().unwrap();
        assert_eq!(log.recoveries, vec![WriteError::Busy]);
        assert_eq!(harness.status.stats().snapshot().recovery_failures, 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut push, harness) = spawn(SimulatedPushSink::new(), 0);
        wait_for(&harness.log, 1);
        assert!(push.is_alive());
        push.stop();
        push.stop();
        assert!(!push.is_alive());
        assert!(harness.log.lock().unwrap().closed);
    }
}
