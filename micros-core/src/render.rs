//! Render contract between the runtime and the demo content.
//!
//! Both halves are invoked in strictly increasing time order by their own
//! scheduler. The audio half runs on a real-time thread: implementations must
//! not block, lock, or allocate without bound.

/// Information about a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Display {
    /// Width of the display's framebuffer in pixels
    pub framebuffer_width_px: u32,
    /// Height of the display's framebuffer in pixels
    pub framebuffer_height_px: u32,
}

/// Produces video frames.
pub trait VideoRenderer {
    /// Called once per video scheduler tick.
    ///
    /// `time_micros` is the scheduling time of the frame in the shared clock's domain.
    fn render_next_video_frame(&mut self, time_micros: u64, display: Display);
}

/// Produces 48 kHz stereo audio.
pub trait AudioRenderer: Send {
    /// Fills `left` and `right` (of equal length) entirely.
    ///
    /// `time_micros` is when the first sample will audibly play, in the shared
    /// clock's domain.
    fn render_next_audio_frame(&mut self, time_micros: u64, left: &mut [f64], right: &mut [f64]);
}

impl<F> AudioRenderer for F
where
    F: FnMut(u64, &mut [f64], &mut [f64]) + Send,
{
    fn render_next_audio_frame(&mut self, time_micros: u64, left: &mut [f64], right: &mut [f64]) {
        self(time_micros, left, right)
    }
}

/// Renders silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silence;

impl AudioRenderer for Silence {
    fn render_next_audio_frame(&mut self, _time_micros: u64, left: &mut [f64], right: &mut [f64]) {
        left.fill(0.0);
        right.fill(0.0);
    }
}
