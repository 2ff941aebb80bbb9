//! # Micros Core
//!
//! A dual-clocked media runtime: one monotonic clock shared by a video
//! scheduler and a real-time audio output, so that every audio buffer and
//! every video frame is stamped with the time it will be seen or heard.
//!
//! The audio side negotiates 48 kHz stereo float output on the default
//! device, then calls an [`AudioRenderer`] once per hardware period (or per
//! push quantum on platforms with blocking output) with the playback time of
//! the first sample.
//!
//! ## Quick Start
//!
//! ```no_run
//! use micros_core::*;
//!
//! let mut phase = 0.0f64;
//! let tone = move |_time: u64, left: &mut [f64], right: &mut [f64]| {
//!     for (l, r) in left.iter_mut().zip(right.iter_mut()) {
//!         let sample = (phase * std::f64::consts::TAU).sin() * 0.2;
//!         phase = (phase + 440.0 / 48000.0).fract();
//!         *l = sample;
//!         *r = sample;
//!     }
//! };
//! let mut runtime = runtime_init(AudioDesc::default(), tone)?;
//!
//! // The video half reads the same clock
//! let frame_time = runtime.now_micros();
//! # let _ = frame_time;
//!
//! for event in runtime.poll_events() {
//!     if event.is_error() {
//!         eprintln!("audio: {:?}", event);
//!     }
//! }
//!
//! runtime.shutdown()?;
//! # Ok::<(), MicrosError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`Clock`]**: tick counter and microsecond conversion shared by both halves
//! - **[`negotiate`](negotiator::negotiate)**: finds and configures the output streams
//! - **[`ChannelRouter`]**: binds left/right to slots of the hardware buffers
//! - **[`CallbackEngine`]**: computes playback timestamps and drives the renderer
//! - **[`MicrosSession`]**: owns a negotiated, running output; stops it on drop
//! - **[`AudioBackend`]**: capability set of the native audio service

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod negotiator;
pub mod push;
pub mod render;
pub mod router;
pub mod runtime;
pub mod session;

pub use backend::{AudioBackend, CpalBackend, DevicePosition, HardwareBuffer, SimulatedBackend};
pub use clock::{Clock, ManualTicks, MonotonicTicks, TickSource};
pub use config::{AudioDesc, EngineMode};
pub use engine::{CallbackEngine, EngineState, EngineStatsSnapshot};
pub use error::{MicrosError, Result};
pub use events::{MicrosEvent, SkipReason};
pub use format::{ChannelMap, StreamFormat};
pub use negotiator::{Negotiation, NegotiationTarget};
pub use push::{PushLoop, PushSink, WriteError};
pub use render::{AudioRenderer, Display, Silence, VideoRenderer};
pub use router::ChannelRouter;
pub use runtime::{MicrosRuntime, runtime_init, runtime_init_with};
pub use session::MicrosSession;
