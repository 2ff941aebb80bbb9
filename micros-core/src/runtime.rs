//! Process-level entry point: the shared clock plus, when a device could be
//! negotiated, a running audio session.

use crate::backend::{AudioBackend, CpalBackend};
use crate::clock::Clock;
use crate::config::AudioDesc;
use crate::engine::EngineStatsSnapshot;
use crate::error::{MicrosError, Result};
use crate::events::MicrosEvent;
use crate::render::AudioRenderer;
use crate::session::MicrosSession;
use std::sync::Arc;

/// Clock and (optional) audio output for one demo process.
///
/// Without a usable output device the runtime still runs: the clock keeps
/// driving the video half and audio is simply absent.
pub struct MicrosRuntime<B: AudioBackend = CpalBackend> {
    clock: Arc<Clock>,
    session: Option<MicrosSession<B>>,
}

/// Initializes the clock and starts audio on the platform's default output device.
pub fn runtime_init<R>(desc: AudioDesc, renderer: R) -> Result<MicrosRuntime>
where
    R: AudioRenderer + 'static,
{
    let clock = Arc::new(Clock::init()?);
    runtime_init_with(desc, clock, CpalBackend::new(), renderer)
}

/// Like [`runtime_init`], with an explicit clock and backend.
pub fn runtime_init_with<B, R>(
    desc: AudioDesc,
    clock: Arc<Clock>,
    backend: B,
    renderer: R,
) -> Result<MicrosRuntime<B>>
where
    B: AudioBackend,
    R: AudioRenderer + 'static,
{
    log::info!(
        "Clock at {} Hz, audio backend '{}'",
        clock.frequency(),
        backend.name()
    );

    let session = match MicrosSession::open(desc, clock.clone(), backend, renderer) {
        Ok(session) => Some(session),
        Err(err) if degrades_to_silence(&err) => {
            log::error!("Audio disabled, continuing without sound: {}", err);
            None
        }
        Err(err) => return Err(err),
    };

    Ok(MicrosRuntime { clock, session })
}

fn degrades_to_silence(err: &MicrosError) -> bool {
    err.is_fatal_at_startup()
        || matches!(err, MicrosError::AudioDevice(_) | MicrosError::AudioFormat(_))
}

impl<B: AudioBackend> MicrosRuntime<B> {
    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    pub fn has_audio(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&MicrosSession<B>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut MicrosSession<B>> {
        self.session.as_mut()
    }

    pub fn stats(&self) -> Option<EngineStatsSnapshot> {
        self.session.as_ref().map(MicrosSession::stats)
    }

    pub fn poll_events(&self) -> Vec<MicrosEvent> {
        self.session
            .as_ref()
            .map(MicrosSession::poll_events)
            .unwrap_or_default()
    }

    /// Stops audio. Safe to call more than once; dropping the runtime does the same.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.stop(),
            None => Ok(()),
        }
    }
}
