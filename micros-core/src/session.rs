//! Audio session: a negotiated output device driven by one render contract.

use crate::backend::AudioBackend;
use crate::clock::Clock;
use crate::config::{AudioDesc, EngineMode};
use crate::engine::{CallbackEngine, EngineState, EngineStatsSnapshot, EngineStatus};
use crate::error::Result;
use crate::events::{EventQueue, MicrosEvent};
use crate::format::ChannelMap;
use crate::negotiator::{self, Negotiation, NegotiationTarget};
use crate::push::PushLoop;
use crate::render::AudioRenderer;
use std::sync::Arc;

/// A negotiated, running audio output bound to one render contract.
///
/// The session owns the backend and everything attached to it. Audio stops
/// when the session is stopped or dropped, whichever comes first.
///
/// # Lifecycle
///
/// [`MicrosSession::open`] validates the descriptor, negotiates the default
/// output device, attaches the engine (as a device callback or a push-loop
/// thread, per [`EngineMode`]) and starts the device.
pub struct MicrosSession<B: AudioBackend> {
    desc: AudioDesc,
    clock: Arc<Clock>,
    backend: B,
    negotiation: Negotiation,
    status: Arc<EngineStatus>,
    events: EventQueue,
    push: Option<PushLoop>,
}

impl<B: AudioBackend> MicrosSession<B> {
    pub fn open<R>(desc: AudioDesc, clock: Arc<Clock>, mut backend: B, renderer: R) -> Result<Self>
    where
        R: AudioRenderer + 'static,
    {
        desc.validate()?;

        let events = EventQueue::new(desc.event_capacity);
        backend.attach_events(events.sender());
        let negotiation = negotiator::negotiate(&mut backend, &NegotiationTarget::from(&desc))?;

        let mut session = Self {
            desc,
            clock,
            backend,
            negotiation,
            status: Arc::new(EngineStatus::new()),
            events,
            push: None,
        };
        session.start(renderer)?;
        Ok(session)
    }

    fn start<R>(&mut self, renderer: R) -> Result<()>
    where
        R: AudioRenderer + 'static,
    {
        let device = self.negotiation.device.id;
        let channel_map = self.negotiation.channel_map;

        match self.desc.mode {
            EngineMode::Callback => {
                let engine = self.engine(renderer, channel_map);
                self.backend.create_callback(device, engine)?;
                self.status.start();
                self.backend.start()?;
            }
            EngineMode::Push => {
                // the sink routes interleaved stereo onto the device channels itself
                let sink = self
                    .backend
                    .create_push_sink(device, channel_map, &self.desc)?;
                let engine = self.engine(renderer, ChannelMap::stereo());
                self.status.start();
                self.backend.start()?;
                self.push = Some(PushLoop::spawn(
                    engine,
                    sink,
                    self.desc.push_quantum_frames(),
                    self.desc.frames_for(self.desc.push_prefill),
                )?);
            }
        }

        self.events.sender().emit(MicrosEvent::EngineStarted);
        log::info!(
            "Audio engine started on '{}' ({:?} mode, {})",
            self.negotiation.device.name,
            self.desc.mode,
            self.negotiation.format
        );
        Ok(())
    }

    fn engine<R: AudioRenderer>(&self, renderer: R, channel_map: ChannelMap) -> CallbackEngine<R> {
        CallbackEngine::new(
            renderer,
            self.clock.clone(),
            channel_map,
            &self.desc,
            self.status.clone(),
            self.events.sender(),
        )
    }

    /// Stops audio and releases the device. Stopping a stopped session is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let previous = self.status.stop();
        if previous == EngineState::Stopped {
            return Ok(());
        }

        if let Some(mut push) = self.push.take() {
            push.stop();
        }
        if let Err(err) = self.backend.stop() {
            log::warn!("Failed to stop audio backend: {}", err);
        }

        if previous == EngineState::Running {
            self.events.sender().emit(MicrosEvent::EngineStopped);
            log::info!(
                "Audio engine stopped after {} frames",
                self.status.stats().snapshot().rendered_frames
            );
        }
        Ok(())
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    pub fn desc(&self) -> &AudioDesc {
        &self.desc
    }

    pub fn negotiation(&self) -> &Negotiation {
        &self.negotiation
    }

    pub fn state(&self) -> EngineState {
        self.status.state()
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.status.stats().snapshot()
    }

    /// Drains engine events queued since the last poll.
    pub fn poll_events(&self) -> Vec<MicrosEvent> {
        self.events.poll()
    }

    /// Events lost because nobody polled in time.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: AudioBackend> Drop for MicrosSession<B> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
