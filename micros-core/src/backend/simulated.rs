//! In-process backend that stands in for an audio device.
//!
//! Devices, streams and formats are described up front; the host drives
//! hardware periods by hand with [`SimulatedBackend::run_period`]. Every call
//! the negotiator and the session make is recorded so tests can assert on it.

use super::{
    AudioBackend, DeviceId, DeviceInfo, DevicePosition, HardwareBuffer, HardwareStream,
    OutputHandler, StreamId,
};
use crate::config::AudioDesc;
use crate::error::{MicrosError, Result};
use crate::format::{ChannelMap, FormatDescription, SampleEncoding, StreamFormat};
use crate::push::{PushSink, WriteError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatedStream {
    pub stream: HardwareStream,
    pub formats: Vec<FormatDescription>,
    /// Make `set_format` fail for this stream
    pub refuse_format: bool,
}

impl SimulatedStream {
    pub fn new(
        id: StreamId,
        starting_channel: u32,
        channel_count: u32,
        formats: Vec<FormatDescription>,
    ) -> Self {
        Self {
            stream: HardwareStream {
                id,
                starting_channel,
                channel_count,
            },
            formats,
            refuse_format: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub name: String,
    pub preferred_stereo: [u32; 2],
    pub streams: Vec<SimulatedStream>,
}

impl SimulatedDevice {
    pub fn new(name: &str, preferred_stereo: [u32; 2], streams: Vec<SimulatedStream>) -> Self {
        Self {
            name: name.to_string(),
            preferred_stereo,
            streams,
        }
    }

    /// A plain stereo device with one 48 kHz float stream.
    pub fn stereo() -> Self {
        Self::new(
            "Simulated Stereo",
            [1, 2],
            vec![SimulatedStream::new(
                0,
                1,
                2,
                vec![FormatDescription::pcm(StreamFormat::new(
                    48000.0,
                    2,
                    SampleEncoding::F32,
                ))],
            )],
        )
    }
}

const DEVICE_ID: DeviceId = 1;

/// Shape of one buffer delivered by [`SimulatedBackend::run_period`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    Mapped(usize),
    /// A stream the device did not map; its channels are still numbered
    Unmapped(usize),
}

pub struct SimulatedBackend {
    device: Option<SimulatedDevice>,
    handler: Option<Box<dyn OutputHandler<f32>>>,
    sink_log: Arc<Mutex<SinkLog>>,
    inspected: Vec<StreamId>,
    applied: Vec<(StreamId, StreamFormat)>,
    starts: usize,
    stops: usize,
    running: bool,
}

impl SimulatedBackend {
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device: Some(device),
            handler: None,
            sink_log: Arc::new(Mutex::new(SinkLog::default())),
            inspected: Vec::new(),
            applied: Vec::new(),
            starts: 0,
            stops: 0,
            running: false,
        }
    }

    pub fn without_device() -> Self {
        let mut backend = Self::new(SimulatedDevice::stereo());
        backend.device = None;
        backend
    }

    /// Streams whose formats were queried, in query order.
    pub fn inspected_streams(&self) -> &[StreamId] {
        &self.inspected
    }

    /// Formats applied through `set_format`, in call order.
    pub fn applied_formats(&self) -> &[(StreamId, StreamFormat)] {
        &self.applied
    }

    pub fn start_count(&self) -> usize {
        self.starts
    }

    pub fn stop_count(&self) -> usize {
        self.stops
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Log shared with push sinks created by this backend.
    pub fn sink_log(&self) -> Arc<Mutex<SinkLog>> {
        self.sink_log.clone()
    }

    /// Delivers one hardware period to the attached handler.
    ///
    /// Returns the contents of every buffer afterwards. Nothing is delivered
    /// while the device is stopped.
    pub fn run_period(
        &mut self,
        layout: &[BufferLayout],
        frames: usize,
        position: DevicePosition,
    ) -> Vec<Vec<f32>> {
        let mut storage: Vec<Vec<f32>> = layout
            .iter()
            .map(|buffer| match buffer {
                BufferLayout::Mapped(channels) => vec![0.0; channels * frames],
                BufferLayout::Unmapped(_) => Vec::new(),
            })
            .collect();

        let Some(handler) = self.handler.as_mut().filter(|_| self.running) else {
            return storage;
        };

        let mut buffers: Vec<HardwareBuffer<'_, f32>> = storage
            .iter_mut()
            .zip(layout)
            .map(|(data, buffer)| match buffer {
                BufferLayout::Mapped(channels) => HardwareBuffer::new(data, *channels),
                BufferLayout::Unmapped(channels) => HardwareBuffer::unmapped(*channels),
            })
            .collect();
        handler.on_output(&mut buffers, position);
        drop(buffers);

        storage
    }

    fn device(&self, id: DeviceId) -> Result<&SimulatedDevice> {
        match &self.device {
            Some(device) if id == DEVICE_ID => Ok(device),
            _ => Err(MicrosError::AudioDevice(format!("Unknown device {}", id))),
        }
    }

    fn stream(&self, id: StreamId) -> Result<&SimulatedStream> {
        self.device
            .iter()
            .flat_map(|device| device.streams.iter())
            .find(|stream| stream.stream.id == id)
            .ok_or_else(|| MicrosError::AudioDevice(format!("Unknown stream {}", id)))
    }
}

impl AudioBackend for SimulatedBackend {
    type Sink = SimulatedPushSink;

    fn name(&self) -> &str {
        "simulated"
    }

    fn default_output_device(&mut self) -> Result<Option<DeviceInfo>> {
        Ok(self.device.as_ref().map(|device| DeviceInfo {
            id: DEVICE_ID,
            name: device.name.clone(),
        }))
    }

    fn preferred_stereo_channels(&mut self, device: DeviceId) -> Result<[u32; 2]> {
        Ok(self.device(device)?.preferred_stereo)
    }

    fn enumerate_streams(&mut self, device: DeviceId) -> Result<Vec<HardwareStream>> {
        Ok(self
            .device(device)?
            .streams
            .iter()
            .map(|stream| stream.stream)
            .collect())
    }

    fn stream_formats(&mut self, stream: StreamId) -> Result<Vec<FormatDescription>> {
        let formats = self.stream(stream)?.formats.clone();
        self.inspected.push(stream);
        Ok(formats)
    }

    fn set_format(&mut self, stream: StreamId, format: &StreamFormat) -> Result<()> {
        if self.stream(stream)?.refuse_format {
            return Err(MicrosError::FormatRejected {
                stream,
                reason: format!("device refused {}", format),
            });
        }
        self.applied.push((stream, *format));
        Ok(())
    }

    fn create_callback<H>(&mut self, device: DeviceId, handler: H) -> Result<()>
    where
        H: OutputHandler<f32> + OutputHandler<f64> + 'static,
    {
        self.device(device)?;
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    fn create_push_sink(
        &mut self,
        device: DeviceId,
        _channel_map: ChannelMap,
        _desc: &AudioDesc,
    ) -> Result<Self::Sink> {
        self.device(device)?;
        Ok(SimulatedPushSink::with_log(self.sink_log.clone()))
    }

    fn start(&mut self) -> Result<()> {
        self.starts += 1;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.running {
            self.stops += 1;
        }
        self.running = false;
        self.handler = None;
        Ok(())
    }
}

/// Everything a [`SimulatedPushSink`] was asked to do.
#[derive(Debug, Default)]
pub struct SinkLog {
    /// Interleaved samples of every accepted write
    pub samples: Vec<f32>,
    /// Accepted writes
    pub writes: usize,
    /// Errors passed to `recover`, in order
    pub recoveries: Vec<WriteError>,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct SinkScript {
    write_failures: VecDeque<WriteError>,
    fail_recovery: bool,
}

/// Push sink that records writes and fails on demand.
pub struct SimulatedPushSink {
    log: Arc<Mutex<SinkLog>>,
    script: Arc<Mutex<SinkScript>>,
    position: DevicePosition,
    pace: Duration,
}

impl Default for SimulatedPushSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPushSink {
    pub fn new() -> Self {
        Self::with_log(Arc::new(Mutex::new(SinkLog::default())))
    }

    fn with_log(log: Arc<Mutex<SinkLog>>) -> Self {
        Self {
            log,
            script: Arc::new(Mutex::new(SinkScript::default())),
            position: DevicePosition::Latency(Duration::ZERO),
            pace: Duration::from_millis(1),
        }
    }

    pub fn log(&self) -> Arc<Mutex<SinkLog>> {
        self.log.clone()
    }

    /// Makes the next accepted write fail with `error` instead.
    pub fn fail_next(&self, error: WriteError) {
        if let Ok(mut script) = self.script.lock() {
            script.write_failures.push_back(error);
        }
    }

    pub fn fail_recovery(&self, fail: bool) {
        if let Ok(mut script) = self.script.lock() {
            script.fail_recovery = fail;
        }
    }

    pub fn set_position(&mut self, position: DevicePosition) {
        self.position = position;
    }
}

impl PushSink for SimulatedPushSink {
    fn write(&mut self, samples: &[f32]) -> std::result::Result<usize, WriteError> {
        std::thread::sleep(self.pace);

        let scripted = self
            .script
            .lock()
            .map_err(|_| WriteError::Device("script poisoned".into()))?
            .write_failures
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        let mut log = self
            .log
            .lock()
            .map_err(|_| WriteError::Device("log poisoned".into()))?;
        if log.closed {
            return Err(WriteError::Device("sink closed".into()));
        }
        log.samples.extend_from_slice(samples);
        log.writes += 1;
        Ok(samples.len() / 2)
    }

    fn recover(&mut self, error: &WriteError) -> std::result::Result<(), WriteError> {
        if let Ok(mut log) = self.log.lock() {
            log.recoveries.push(error.clone());
        }
        let fail = self.script.lock().map(|s| s.fail_recovery).unwrap_or(true);
        if fail {
            Err(error.clone())
        } else {
            Ok(())
        }
    }

    fn position(&mut self) -> DevicePosition {
        self.position
    }

    fn close(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.closed = true;
        }
    }
}
