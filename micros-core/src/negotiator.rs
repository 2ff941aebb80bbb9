//! Stream negotiation: find 48 kHz stereo packed-float output on the default device.
//!
//! The search is greedy and deterministic: streams and their format
//! descriptions are visited in the order the device reports them, and the
//! first acceptable description of each relevant stream wins. Scanning stops
//! as soon as both stereo channels are resolved.

use crate::backend::{AudioBackend, DeviceInfo, HardwareStream};
use crate::config::AudioDesc;
use crate::error::{MicrosError, Result};
use crate::format::{ChannelMap, FormatDescription, FormatId, StreamFormat};

/// What negotiation is looking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiationTarget {
    pub sample_rate: f64,
    pub tolerance_hz: f64,
}

impl Default for NegotiationTarget {
    fn default() -> Self {
        Self::from(&AudioDesc::default())
    }
}

impl From<&AudioDesc> for NegotiationTarget {
    fn from(desc: &AudioDesc) -> Self {
        Self {
            sample_rate: desc.sample_rate as f64,
            tolerance_hz: desc.rate_tolerance_hz,
        }
    }
}

/// Why a format description was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotLinearPcm,
    UnsupportedRate,
    UnsupportedEncoding,
}

impl NegotiationTarget {
    pub fn check(&self, description: &FormatDescription) -> std::result::Result<(), Rejection> {
        if description.format_id != FormatId::LinearPcm {
            return Err(Rejection::NotLinearPcm);
        }

        let format = &description.format;
        let variable_rate =
            format.is_any_rate() && description.rate_range.contains(self.sample_rate);
        let nominal_rate = (self.sample_rate - format.sample_rate).abs() < self.tolerance_hz;
        if !variable_rate && !nominal_rate {
            return Err(Rejection::UnsupportedRate);
        }

        if !format.encoding.is_packed_float() {
            return Err(Rejection::UnsupportedEncoding);
        }
        Ok(())
    }

    pub fn accepts(&self, description: &FormatDescription) -> bool {
        self.check(description).is_ok()
    }
}

/// A stream whose format was switched during negotiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiatedStream {
    pub stream: HardwareStream,
    pub format: StreamFormat,
}

/// Validated hardware configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiation {
    pub device: DeviceInfo,
    pub channel_map: ChannelMap,
    /// Format of the stream carrying the left channel
    pub format: StreamFormat,
    /// Configured streams, in the order they were chosen
    pub streams: Vec<NegotiatedStream>,
}

fn carried_range(negotiated: &NegotiatedStream) -> std::ops::Range<u32> {
    let start = negotiated.stream.starting_channel;
    start..start + negotiated.format.channels as u32
}

/// Runs the negotiation against `backend`'s default output device.
pub fn negotiate<B: AudioBackend>(
    backend: &mut B,
    target: &NegotiationTarget,
) -> Result<Negotiation> {
    let device = backend
        .default_output_device()?
        .ok_or(MicrosError::NoOutputDevice)?;
    log::info!(
        "Negotiating {} Hz stereo float output on '{}' ({})",
        target.sample_rate,
        device.name,
        backend.name()
    );

    let [left, right] = backend.preferred_stereo_channels(device.id)?;
    log::debug!("Preferred stereo channels: {} / {}", left, right);

    let mut pending = [Some(left), Some(right)];
    let mut resolved: [Option<u32>; 2] = [None, None];
    let mut streams = Vec::new();

    for (index, stream) in backend.enumerate_streams(device.id)?.into_iter().enumerate() {
        let relevant = pending
            .iter()
            .flatten()
            .any(|channel| stream.covers(*channel));
        if !relevant {
            log::debug!(
                "Skipping stream {} starting at channel {}",
                stream.id,
                stream.starting_channel
            );
            continue;
        }

        let descriptions = backend.stream_formats(stream.id)?;
        let chosen = descriptions
            .iter()
            .enumerate()
            .find(|(desc_index, description)| match target.check(description) {
                Ok(()) => true,
                Err(rejection) => {
                    log::debug!(
                        "Stream {} description {} ({}): {:?}",
                        stream.id,
                        desc_index,
                        description.format,
                        rejection
                    );
                    false
                }
            });
        let Some((desc_index, description)) = chosen else {
            log::debug!("Stream {} offers no acceptable format", stream.id);
            continue;
        };

        log::info!(
            "Chose stream {} (#{}) description {}: {}",
            stream.id,
            index,
            desc_index,
            description.format
        );

        let mut format = description.format;
        format.sample_rate = target.sample_rate;
        backend
            .set_format(stream.id, &format)
            .map_err(|err| match err {
                MicrosError::FormatRejected { .. } => err,
                other => MicrosError::FormatRejected {
                    stream: stream.id,
                    reason: other.to_string(),
                },
            })?;

        let negotiated = NegotiatedStream { stream, format };
        let carried = carried_range(&negotiated);
        for slot in 0..2 {
            if let Some(channel) = pending[slot] {
                if carried.contains(&channel) {
                    resolved[slot] = Some(channel);
                    pending[slot] = None;
                }
            }
        }
        streams.push(negotiated);

        if pending.iter().all(Option::is_none) {
            break;
        }
    }

    let channel_map = ChannelMap::resolve(resolved[0], resolved[1])?;
    log::info!(
        "Negotiated channels {} / {} on '{}'",
        channel_map.left(),
        channel_map.right(),
        device.name
    );

    let format = streams
        .iter()
        .find(|negotiated| carried_range(negotiated).contains(&channel_map.left()))
        .map(|negotiated| negotiated.format)
        .ok_or(MicrosError::ChannelUnresolved {
            left: None,
            right: resolved[1],
        })?;

    Ok(Negotiation {
        device,
        channel_map,
        format,
        streams,
    })
}
