//! Platform audio backends.
//!
//! A backend exposes the small capability set the negotiator and the engine
//! need from the native audio service: find the default device, describe its
//! hardware streams and formats, switch a stream's format, attach the output
//! handler (or hand out a blocking push sink), and start/stop the device.
//!
//! Each invocation of an attached handler carries the device's position
//! report, so no separate position query crosses the real-time boundary.

mod cpal_host;
mod simulated;

pub use cpal_host::{CpalBackend, CpalPushSink};
pub use simulated::{
    BufferLayout, SimulatedBackend, SimulatedDevice, SimulatedPushSink, SimulatedStream, SinkLog,
};

use crate::config::AudioDesc;
use crate::error::Result;
use crate::events::EventSender;
use crate::format::{ChannelMap, FormatDescription, StreamFormat};
use crate::push::PushSink;
use std::time::Duration;

pub type DeviceId = u32;
pub type StreamId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
}

/// A hardware sub-stream of a device, covering a contiguous run of channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareStream {
    pub id: StreamId,
    /// First device channel (1-based) carried by this stream
    pub starting_channel: u32,
    pub channel_count: u32,
}

impl HardwareStream {
    pub fn covers(&self, channel: u32) -> bool {
        channel >= self.starting_channel && channel < self.starting_channel + self.channel_count
    }
}

/// One interleaved buffer of a hardware callback.
///
/// A callback may deliver several of these (one per hardware stream); the
/// device's channels are numbered across them in order.
#[derive(Debug)]
pub struct HardwareBuffer<'a, T> {
    /// Sample memory, absent when the device did not map this stream
    pub data: Option<&'a mut [T]>,
    /// Interleaved channels per frame
    pub channels: usize,
}

impl<'a, T> HardwareBuffer<'a, T> {
    pub fn new(data: &'a mut [T], channels: usize) -> Self {
        Self {
            data: Some(data),
            channels,
        }
    }

    pub fn unmapped(channels: usize) -> Self {
        Self {
            data: None,
            channels,
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.data {
            Some(data) if self.channels > 0 => data.len() / self.channels,
            _ => 0,
        }
    }
}

/// What the device reports about playback progress at callback time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePosition {
    /// Microseconds of rendered audio that have actually reached the speaker
    Played(u64),
    /// Delay until the first sample of the current buffer reaches the speaker
    Latency(Duration),
    /// The position query failed
    Unavailable,
}

/// Receives hardware output periods.
pub trait OutputHandler<T>: Send {
    fn on_output(&mut self, buffers: &mut [HardwareBuffer<'_, T>], position: DevicePosition);
}

/// Capability set of a native audio service.
pub trait AudioBackend {
    /// Blocking sink handed to the push loop.
    type Sink: PushSink + 'static;

    fn name(&self) -> &str;

    /// Gives the backend a channel for errors reported by the device itself.
    fn attach_events(&mut self, _events: EventSender) {}

    /// The platform's default output device, or `None` when there is none.
    fn default_output_device(&mut self) -> Result<Option<DeviceInfo>>;

    /// The device's preferred (left, right) channel pair, 1-based.
    fn preferred_stereo_channels(&mut self, device: DeviceId) -> Result<[u32; 2]>;

    /// Hardware streams of the device, in device order.
    fn enumerate_streams(&mut self, device: DeviceId) -> Result<Vec<HardwareStream>>;

    /// Format descriptions the stream supports, in device order.
    fn stream_formats(&mut self, stream: StreamId) -> Result<Vec<FormatDescription>>;

    /// Switches a stream to `format`.
    fn set_format(&mut self, stream: StreamId, format: &StreamFormat) -> Result<()>;

    /// Attaches the handler the device will call once per hardware period.
    fn create_callback<H>(&mut self, device: DeviceId, handler: H) -> Result<()>
    where
        H: OutputHandler<f32> + OutputHandler<f64> + 'static;

    /// Opens a blocking interleaved-stereo sink on the device, sized for the
    /// push quantum and silence prefill of `desc`.
    fn create_push_sink(
        &mut self,
        device: DeviceId,
        channel_map: ChannelMap,
        desc: &AudioDesc,
    ) -> Result<Self::Sink>;

    fn start(&mut self) -> Result<()>;

    /// Stops the device and releases the callback. Stopping a stopped device is a no-op.
    fn stop(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_covers_its_channel_run() {
        let stream = HardwareStream {
            id: 7,
            starting_channel: 3,
            channel_count: 2,
        };
        assert!(!stream.covers(2));
        assert!(stream.covers(3));
        assert!(stream.covers(4));
        assert!(!stream.covers(5));
    }

    #[test]
    fn frame_count_of_unmapped_buffer_is_zero() {
        let mut data = [0.0f32; 12];
        assert_eq!(HardwareBuffer::new(&mut data, 6).frame_count(), 2);
        assert_eq!(HardwareBuffer::<f32>::unmapped(2).frame_count(), 0);
        assert_eq!(HardwareBuffer::new(&mut data, 0).frame_count(), 0);
    }
}
