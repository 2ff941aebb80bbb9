mod content;
mod ticker;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use content::{Beep, BeepSchedule, Flash};
use micros_core::backend::{BufferLayout, SimulatedDevice};
use micros_core::{
    AudioBackend, AudioDesc, Clock, DevicePosition, Display, EngineMode, MicrosRuntime,
    SimulatedBackend, VideoRenderer, runtime_init, runtime_init_with,
};
use std::sync::Arc;
use ticker::FrameTicker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Callback,
    Push,
}

/// Audio/video sync demo: a beep and a flash once per second
#[derive(Parser, Debug)]
#[command(name = "micros-demo")]
struct Args {
    /// Run against a simulated device instead of the default output
    #[arg(long)]
    simulate: bool,

    /// Engine mode (defaults to the platform's native mode)
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Video frames per second
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Beep frequency in Hz
    #[arg(long, default_value_t = 880.0)]
    tone: f64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let mut desc = AudioDesc::default();
    if let Some(mode) = args.mode {
        desc = desc.mode(match mode {
            Mode::Callback => EngineMode::Callback,
            Mode::Push => EngineMode::Push,
        });
    }

    let schedule = BeepSchedule::default();
    let beep = Beep::new(schedule, args.tone, 0.25);

    if args.simulate {
        let clock = Arc::new(Clock::init()?);
        let backend = SimulatedBackend::new(SimulatedDevice::stereo());
        let mut runtime = runtime_init_with(desc, clock, backend, beep)?;
        let period_frames = (48_000 / args.fps.max(1)) as usize;
        run(&mut runtime, &args, Flash::new(schedule), |runtime| {
            // stand in for the hardware: one period of audio per video frame
            if let Some(session) = runtime.session_mut() {
                session.backend_mut().run_period(
                    &[BufferLayout::Mapped(2)],
                    period_frames,
                    DevicePosition::Latency(std::time::Duration::ZERO),
                );
            }
        })
    } else {
        let mut runtime = runtime_init(desc, beep)?;
        run(&mut runtime, &args, Flash::new(schedule), |_| {})
    }
}

fn run<B: AudioBackend>(
    runtime: &mut MicrosRuntime<B>,
    args: &Args,
    mut video: Flash,
    mut after_frame: impl FnMut(&mut MicrosRuntime<B>),
) -> Result<()> {
    if !runtime.has_audio() {
        log::warn!("No audio output, running video only");
    }

    let display = Display {
        framebuffer_width_px: args.width,
        framebuffer_height_px: args.height,
    };
    let mut ticker = FrameTicker::new(runtime.clock().clone(), args.fps);
    let end = runtime
        .now_micros()
        .saturating_add((args.seconds.max(0.0) * 1_000_000.0) as u64);

    loop {
        let frame_time = ticker.next_frame();
        if frame_time >= end {
            break;
        }
        video.render_next_video_frame(frame_time, display);
        after_frame(runtime);

        for event in runtime.poll_events() {
            if event.is_error() {
                log::warn!("Audio event: {:?}", event);
            } else {
                log::debug!("Audio event: {:?}", event);
            }
        }
    }

    runtime.shutdown()?;
    log::info!(
        "Rendered {} video frames ({} flashes, {} skipped)",
        video.frames(),
        video.flashes(),
        ticker.skipped()
    );
    if let Some(stats) = runtime.stats() {
        log::info!(
            "Rendered {} audio frames in {} invocations ({} skipped, {} underruns)",
            stats.rendered_frames,
            stats.invocations,
            stats.skipped_invocations,
            stats.underruns
        );
    }
    Ok(())
}
