//! Backend on top of cpal's default host.
//!
//! cpal presents a device as a single interleaved stream, so the device is
//! described as one hardware stream starting at channel 1. Its format
//! descriptions are the supported output configurations that carry the full
//! width of that stream.

use super::{
    AudioBackend, DeviceId, DeviceInfo, DevicePosition, HardwareBuffer, HardwareStream,
    OutputHandler, StreamId,
};
use crate::config::AudioDesc;
use crate::error::{MicrosError, Result};
use crate::events::{EventSender, MicrosEvent};
use crate::format::{ChannelMap, FormatDescription, RateRange, SampleEncoding, StreamFormat};
use crate::push::{PushSink, WriteError};
use crate::router::{self, ChannelRouter};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_DEVICE: DeviceId = 0;
const DEVICE_STREAM: StreamId = 0;

/// Audio backend using the platform's default cpal host.
pub struct CpalBackend {
    host: cpal::Host,
    device: Option<cpal::Device>,
    config: Option<(cpal::StreamConfig, cpal::SampleFormat)>,
    stream: Option<cpal::Stream>,
    events: Option<EventSender>,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device: None,
            config: None,
            stream: None,
            events: None,
        }
    }

    fn device(&self, id: DeviceId) -> Result<&cpal::Device> {
        match &self.device {
            Some(device) if id == DEFAULT_DEVICE => Ok(device),
            _ => Err(MicrosError::AudioDevice(format!("Unknown device {}", id))),
        }
    }

    fn negotiated_config(&self) -> Result<(cpal::StreamConfig, cpal::SampleFormat)> {
        self.config.clone().ok_or_else(|| {
            MicrosError::Engine("Output format must be set before creating a stream".into())
        })
    }

    fn default_channels(&self, device: DeviceId) -> Result<u16> {
        let config = self.device(device)?.default_output_config().map_err(|e| {
            MicrosError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;
        Ok(config.channels())
    }

    fn supported_ranges(&self) -> Result<Vec<cpal::SupportedStreamConfigRange>> {
        let device = self.device(DEFAULT_DEVICE)?;
        let ranges = device.supported_output_configs().map_err(|e| {
            MicrosError::AudioDevice(format!("Failed to query output configs: {}", e))
        })?;
        Ok(ranges.collect())
    }

    /// Builds a stream that hands every period to `handler`.
    fn build_stream<T, H>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut handler: H,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        H: OutputHandler<T> + 'static,
    {
        let channels = config.channels as usize;
        let events = self.events.clone();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                    let position = latency_of(info);
                    let mut buffers = [HardwareBuffer::new(data, channels)];
                    handler.on_output(&mut buffers, position);
                },
                move |err| stream_error(&events, err),
                None,
            )
            .map_err(|e| MicrosError::AudioDevice(format!("Failed to build stream: {}", e)))
    }

    /// Builds a stream that drains the push ring into the mapped channels.
    fn build_push_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut drain: PushDrain,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let channels = config.channels as usize;
        let events = self.events.clone();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    drain.fill(&mut [HardwareBuffer::new(data, channels)]);
                },
                move |err| stream_error(&events, err),
                None,
            )
            .map_err(|e| MicrosError::AudioDevice(format!("Failed to build push stream: {}", e)))
    }
}

fn latency_of(info: &cpal::OutputCallbackInfo) -> DevicePosition {
    let timestamp = info.timestamp();
    match timestamp.playback.duration_since(&timestamp.callback) {
        Some(latency) => DevicePosition::Latency(latency),
        None => DevicePosition::Unavailable,
    }
}

fn stream_error(events: &Option<EventSender>, err: cpal::StreamError) {
    log::error!("Audio stream error: {}", err);
    if let Some(events) = events {
        events.emit(MicrosEvent::StreamError {
            error: err.to_string(),
        });
    }
}

fn encoding_of(format: cpal::SampleFormat) -> SampleEncoding {
    let bits = (format.sample_size() * 8) as u16;
    if format.is_float() {
        SampleEncoding::float(bits)
    } else if format.is_uint() {
        SampleEncoding::unsigned(bits)
    } else {
        SampleEncoding::signed(bits)
    }
}

/// Descriptions of the ranges that fill every channel of a `channel_count` wide stream.
///
/// ALSA lists each channel count a sample format allows, narrowest first. A
/// narrower range would resolve only part of the preferred pair and use up
/// the device's single stream.
fn stream_descriptions(
    ranges: &[cpal::SupportedStreamConfigRange],
    channel_count: u16,
) -> Vec<FormatDescription> {
    ranges
        .iter()
        .filter(|range| range.channels() == channel_count)
        .map(describe)
        .collect()
}

fn describe(range: &cpal::SupportedStreamConfigRange) -> FormatDescription {
    let encoding = encoding_of(range.sample_format());
    let min = range.min_sample_rate().0 as f64;
    let max = range.max_sample_rate().0 as f64;
    if min == max {
        FormatDescription::pcm(StreamFormat::new(min, range.channels(), encoding))
    } else {
        FormatDescription::pcm_any_rate(range.channels(), encoding, RateRange::new(min, max))
    }
}

impl AudioBackend for CpalBackend {
    type Sink = CpalPushSink;

    fn name(&self) -> &str {
        "cpal"
    }

    fn attach_events(&mut self, events: EventSender) {
        self.events = Some(events);
    }

    fn default_output_device(&mut self) -> Result<Option<DeviceInfo>> {
        self.device = self.host.default_output_device();
        Ok(self.device.as_ref().map(|device| DeviceInfo {
            id: DEFAULT_DEVICE,
            name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
        }))
    }

    fn preferred_stereo_channels(&mut self, device: DeviceId) -> Result<[u32; 2]> {
        self.device(device)?;
        Ok([1, 2])
    }

    fn enumerate_streams(&mut self, device: DeviceId) -> Result<Vec<HardwareStream>> {
        Ok(vec![HardwareStream {
            id: DEVICE_STREAM,
            starting_channel: 1,
            channel_count: self.default_channels(device)? as u32,
        }])
    }

    fn stream_formats(&mut self, stream: StreamId) -> Result<Vec<FormatDescription>> {
        if stream != DEVICE_STREAM {
            return Err(MicrosError::AudioDevice(format!("Unknown stream {}", stream)));
        }
        let channel_count = self.default_channels(DEFAULT_DEVICE)?;
        let ranges = self.supported_ranges()?;
        let formats = stream_descriptions(&ranges, channel_count);
        if formats.is_empty() {
            log::warn!(
                "None of {} output configs covers all {} channels",
                ranges.len(),
                channel_count
            );
        }
        Ok(formats)
    }

    fn set_format(&mut self, stream: StreamId, format: &StreamFormat) -> Result<()> {
        let rate = format.sample_rate.round() as u32;
        let range = self
            .supported_ranges()?
            .into_iter()
            .find(|range| {
                range.channels() == format.channels
                    && encoding_of(range.sample_format()) == format.encoding
                    && range.min_sample_rate().0 <= rate
                    && rate <= range.max_sample_rate().0
            })
            .ok_or_else(|| MicrosError::FormatRejected {
                stream,
                reason: format!("no output config matches {}", format),
            })?;

        let config = range.with_sample_rate(cpal::SampleRate(rate));
        log::debug!("Output config set to {:?}", config);
        self.config = Some((config.config(), config.sample_format()));
        Ok(())
    }

    fn create_callback<H>(&mut self, device: DeviceId, handler: H) -> Result<()>
    where
        H: OutputHandler<f32> + OutputHandler<f64> + 'static,
    {
        let (config, sample_format) = self.negotiated_config()?;
        let device = self.device(device)?;
        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32, H>(device, &config, handler)?,
            cpal::SampleFormat::F64 => self.build_stream::<f64, H>(device, &config, handler)?,
            other => {
                return Err(MicrosError::AudioFormat(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    fn create_push_sink(
        &mut self,
        device: DeviceId,
        channel_map: ChannelMap,
        desc: &AudioDesc,
    ) -> Result<Self::Sink> {
        let (config, sample_format) = self.negotiated_config()?;
        let quantum_frames = desc.push_quantum_frames();
        let capacity = (desc.frames_for(desc.push_prefill) + 2 * quantum_frames) * 2;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let shared = Arc::new(PushShared::default());
        let drain = PushDrain::new(consumer, ChannelRouter::new(channel_map), shared.clone());

        let device = self.device(device)?;
        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_push_stream::<f32>(device, &config, drain)?,
            cpal::SampleFormat::F64 => self.build_push_stream::<f64>(device, &config, drain)?,
            other => {
                return Err(MicrosError::AudioFormat(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        };
        self.stream = Some(stream);

        log::debug!(
            "Push ring of {} frames ({} frame quantum)",
            capacity / 2,
            quantum_frames
        );
        Ok(CpalPushSink::new(
            producer,
            shared,
            desc.sample_rate,
            quantum_frames,
            desc.push_quantum * 8,
        ))
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| MicrosError::Engine("No output stream to start".into()))?;
        stream
            .play()
            .map_err(|e| MicrosError::AudioDevice(format!("Failed to start stream: {}", e)))
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            paused.map_err(|e| MicrosError::AudioDevice(format!("Failed to stop stream: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// State shared between a push sink and its device callback.
#[derive(Default)]
struct PushShared {
    /// Set once the sink has accepted its first write
    primed: AtomicBool,
    underrun: AtomicBool,
    wake: (Mutex<()>, Condvar),
}

impl PushShared {
    fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    fn notify(&self) {
        self.wake.1.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        if let Ok(guard) = self.wake.0.lock() {
            let _ = self.wake.1.wait_timeout(guard, timeout);
        }
    }
}

/// Device side of a push sink: moves queued stereo pairs into the mapped channels.
struct PushDrain {
    consumer: HeapCons<f32>,
    router: ChannelRouter,
    shared: Arc<PushShared>,
    scratch: Vec<f32>,
}

impl PushDrain {
    fn new(consumer: HeapCons<f32>, router: ChannelRouter, shared: Arc<PushShared>) -> Self {
        Self {
            consumer,
            router,
            shared,
            scratch: vec![0.0; 4096],
        }
    }

    /// Fills one device period. Running dry after the first write flags an underrun.
    fn fill<T>(&mut self, buffers: &mut [HardwareBuffer<'_, T>])
    where
        T: Sample + FromSample<f32>,
    {
        router::silence(buffers);
        let Ok(stereo) = self.router.route(buffers) else {
            return;
        };

        let wanted = stereo.frame_count() * 2;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0.0);
        }
        let popped = self.consumer.pop_slice(&mut self.scratch[..wanted]);
        self.scratch[popped..wanted].fill(0.0);
        if popped < wanted && self.shared.is_primed() {
            self.shared.underrun.store(true, Ordering::Release);
        }

        let pairs = &self.scratch[..wanted];
        for (role, binding) in [stereo.left, stereo.right].iter().enumerate() {
            let Some(out) = buffers
                .get_mut(binding.buffer)
                .and_then(|buffer| buffer.data.as_deref_mut())
            else {
                continue;
            };
            for (frame, pair) in pairs.chunks_exact(2).enumerate() {
                out[binding.sample_index(frame)] = T::from_sample(pair[role]);
            }
        }
        self.shared.notify();
    }
}

/// Blocking sink feeding a cpal stream through a ring buffer.
pub struct CpalPushSink {
    producer: HeapProd<f32>,
    shared: Arc<PushShared>,
    sample_rate: u32,
    quantum_frames: usize,
    write_timeout: Duration,
}

impl CpalPushSink {
    fn new(
        producer: HeapProd<f32>,
        shared: Arc<PushShared>,
        sample_rate: u32,
        quantum_frames: usize,
        write_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            shared,
            sample_rate,
            quantum_frames,
            write_timeout,
        }
    }
}

impl PushSink for CpalPushSink {
    fn write(&mut self, samples: &[f32]) -> std::result::Result<usize, WriteError> {
        if self.shared.underrun.swap(false, Ordering::AcqRel) {
            return Err(WriteError::Underrun);
        }

        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;
        while written < samples.len() {
            written += self.producer.push_slice(&samples[written..]);
            if written == samples.len() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                if written == 0 {
                    return Err(WriteError::Busy);
                }
                break;
            }
            self.shared.wait((deadline - now).min(Duration::from_millis(5)));
        }

        self.shared.primed.store(true, Ordering::Release);
        Ok(written / 2)
    }

    fn recover(&mut self, error: &WriteError) -> std::result::Result<(), WriteError> {
        match error {
            WriteError::Underrun => {
                let silence = vec![0.0f32; self.quantum_frames * 2];
                self.producer.push_slice(&silence);
                self.shared.underrun.store(false, Ordering::Release);
                Ok(())
            }
            WriteError::Busy => Ok(()),
            WriteError::Device(_) => Err(error.clone()),
        }
    }

    fn position(&mut self) -> DevicePosition {
        let queued_frames = (self.producer.occupied_len() / 2) as u64;
        DevicePosition::Latency(Duration::from_micros(
            queued_frames * 1_000_000 / self.sample_rate.max(1) as u64,
        ))
    }

    fn close(&mut self) {
        self.shared.primed.store(false, Ordering::Release);
        self.shared.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedBackend, SimulatedDevice, SimulatedStream};
    use crate::negotiator::{self, NegotiationTarget};
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn sample_formats_map_to_encodings() {
        assert_eq!(encoding_of(SampleFormat::F32), SampleEncoding::F32);
        assert_eq!(encoding_of(SampleFormat::F64), SampleEncoding::F64);
        assert_eq!(encoding_of(SampleFormat::I16), SampleEncoding::I16);
        assert_eq!(encoding_of(SampleFormat::U8), SampleEncoding::unsigned(8));
    }

    #[test]
    fn ranges_become_wildcard_descriptions() {
        let fixed = describe(&range(2, 48000, 48000, SampleFormat::F32));
        assert_eq!(fixed.format.sample_rate, 48000.0);
        assert_eq!(fixed.format.channels, 2);

        let wide = describe(&range(2, 8000, 192000, SampleFormat::F32));
        assert!(wide.format.is_any_rate());
        assert!(wide.rate_range.contains(48000.0));
    }
    #[test]
    fn alsa_channel_ladder_still_negotiates_stereo() {
        // every channel count per sample format, narrowest first
        let ranges = [
            range(1, 8000, 192000, SampleFormat::I16),
            range(2, 8000, 192000, SampleFormat::I16),
            range(1, 8000, 192000, SampleFormat::F32),
            range(2, 8000, 192000, SampleFormat::F32),
        ];
        let formats = stream_descriptions(&ranges, 2);
        assert_eq!(formats.len(), 2);
        assert!(formats.iter().all(|d| d.format.channels == 2));

        let streams = vec![SimulatedStream::new(0, 1, 2, formats)];
        let mut backend = SimulatedBackend::new(SimulatedDevice::new("alsa", [1, 2], streams));
        let negotiation =
            negotiator::negotiate(&mut backend, &NegotiationTarget::default()).unwrap();

        assert_eq!(negotiation.channel_map, ChannelMap::stereo());
        assert_eq!(negotiation.format.channels, 2);
        assert_eq!(negotiation.format.encoding, SampleEncoding::F32);
        assert_eq!(negotiation.format.sample_rate, 48000.0);
    }

    #[test]
    fn surround_default_keeps_only_full_width_ranges() {
        let ranges = [
            range(2, 48000, 48000, SampleFormat::F32),
            range(6, 48000, 48000, SampleFormat::F32),
        ];
        let formats = stream_descriptions(&ranges, 6);
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].format.channels, 6);
    }

    fn push_pair(capacity_frames: usize, write_timeout: Duration) -> (CpalPushSink, PushDrain) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity_frames * 2).split();
        let shared = Arc::new(PushShared::default());
        let router = ChannelRouter::new(ChannelMap::stereo());
        let drain = PushDrain::new(consumer, router, shared.clone());
        let sink = CpalPushSink::new(producer, shared, 48000, 4, write_timeout);
        (sink, drain)
    }

    fn period(drain: &mut PushDrain, frames: usize) -> Vec<f32> {
        let mut data = vec![9.0f32; frames * 2];
        drain.fill(&mut [HardwareBuffer::new(&mut data, 2)]);
        data
    }

    #[test]
    fn drained_ring_reports_underrun_until_recovered() {
        let (mut sink, mut drain) = push_pair(16, Duration::from_millis(10));

        // an empty ring before the first write is plain silence
        assert_eq!(period(&mut drain, 2), vec![0.0; 4]);
        assert_eq!(sink.write(&[0.5, -0.5, 0.5, -0.5]), Ok(2));

        assert_eq!(
            period(&mut drain, 4),
            vec![0.5, -0.5, 0.5, -0.5, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(sink.write(&[0.25, -0.25]), Err(WriteError::Underrun));

        drain.shared.underrun.store(true, Ordering::Release);
        assert_eq!(sink.recover(&WriteError::Underrun), Ok(()));
        assert!(!drain.shared.underrun.load(Ordering::Acquire));
        assert_eq!(sink.write(&[0.25, -0.25]), Ok(1));

        // a quantum of silence plays ahead of the retried pair
        let out = period(&mut drain, 5);
        assert_eq!(&out[..8], &[0.0; 8]);
        assert_eq!(&out[8..], &[0.25, -0.25]);
    }

    #[test]
    fn full_ring_times_out_as_busy() {
        let (mut sink, mut drain) = push_pair(4, Duration::from_millis(10));
        assert_eq!(sink.write(&[0.1; 8]), Ok(4));
        assert_eq!(sink.write(&[0.2; 2]), Err(WriteError::Busy));

        // room for one frame: the write is cut short at the deadline
        period(&mut drain, 1);
        assert_eq!(sink.write(&[0.3; 4]), Ok(1));
        assert!(!drain.shared.underrun.load(Ordering::Acquire));
    }

    #[test]
    fn position_is_the_queued_audio() {
        let (mut sink, mut drain) = push_pair(1024, Duration::from_millis(10));
        assert_eq!(sink.position(), DevicePosition::Latency(Duration::ZERO));

        assert_eq!(sink.write(&[0.0; 960]), Ok(480));
        assert_eq!(
            sink.position(),
            DevicePosition::Latency(Duration::from_millis(10))
        );

        period(&mut drain, 240);
        assert_eq!(
            sink.position(),
            DevicePosition::Latency(Duration::from_millis(5))
        );
    }

    #[test]
    fn drain_writes_the_mapped_channels_only() {
        let (producer, consumer) = HeapRb::<f32>::new(8).split();
        let shared = Arc::new(PushShared::default());
        let map = ChannelMap::resolve(Some(3), Some(4)).unwrap();
        let mut drain = PushDrain::new(consumer, ChannelRouter::new(map), shared.clone());
        let mut sink = CpalPushSink::new(producer, shared, 48000, 1, Duration::from_millis(10));
        assert_eq!(sink.write(&[1.0, -1.0, 0.5, -0.5]), Ok(2));

        let mut data = [9.0f32; 8];
        drain.fill(&mut [HardwareBuffer::new(&mut data, 4)]);
        assert_eq!(data, [0.0, 0.0, 1.0, -1.0, 0.0, 0.0, 0.5, -0.5]);
    }
}
