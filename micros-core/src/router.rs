//! Channel router: binds the left/right roles to slots of the hardware buffers.

use crate::backend::HardwareBuffer;
use crate::events::SkipReason;
use crate::format::ChannelMap;
use cpal::{FromSample, Sample};

/// Where one role's samples live inside the hardware buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBinding {
    /// Index of the hardware buffer
    pub buffer: usize,
    /// Slot of the channel inside an interleaved frame
    pub offset: usize,
    /// Distance between consecutive samples of the channel
    pub stride: usize,
    pub frame_count: usize,
}

impl OutputBinding {
    pub fn sample_index(&self, frame: usize) -> usize {
        self.offset + frame * self.stride
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StereoBinding {
    pub left: OutputBinding,
    pub right: OutputBinding,
}

impl StereoBinding {
    pub fn frame_count(&self) -> usize {
        self.left.frame_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    UnboundOutput,
    FrameCountMismatch { left: usize, right: usize },
}

impl From<RouteError> for SkipReason {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::UnboundOutput => SkipReason::UnboundOutput,
            RouteError::FrameCountMismatch { left, right } => {
                SkipReason::FrameCountMismatch { left, right }
            }
        }
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnboundOutput => write!(f, "no left/right buffer"),
            Self::FrameCountMismatch { left, right } => {
                write!(f, "left frame count {} is not right frame count {}", left, right)
            }
        }
    }
}

impl std::error::Error for RouteError {}

#[derive(Debug, Clone, Copy)]
pub struct ChannelRouter {
    map: ChannelMap,
}

impl ChannelRouter {
    pub fn new(map: ChannelMap) -> Self {
        Self { map }
    }

    pub fn channel_map(&self) -> ChannelMap {
        self.map
    }

    /// Walks the buffers' channel layout and binds the left/right destinations.
    ///
    /// Channels are numbered from 1 across all buffers in order; unmapped buffers
    /// still consume their channel numbers but never bind.
    pub fn route<T>(
        &self,
        buffers: &[HardwareBuffer<'_, T>],
    ) -> Result<StereoBinding, RouteError> {
        let targets = [self.map.left(), self.map.right()];
        let mut bound: [Option<OutputBinding>; 2] = [None, None];

        let mut current_channel = 1u32;
        for (index, buffer) in buffers.iter().enumerate() {
            let frame_count = buffer.frame_count();
            for slot in 0..buffer.channels {
                if buffer.data.is_some() {
                    for (role, target) in targets.iter().enumerate() {
                        if current_channel == *target {
                            bound[role] = Some(OutputBinding {
                                buffer: index,
                                offset: slot,
                                stride: buffer.channels,
                                frame_count,
                            });
                        }
                    }
                }
                current_channel += 1;
            }
        }

        let (Some(left), Some(right)) = (bound[0], bound[1]) else {
            return Err(RouteError::UnboundOutput);
        };
        if left.frame_count != right.frame_count {
            return Err(RouteError::FrameCountMismatch {
                left: left.frame_count,
                right: right.frame_count,
            });
        }
        Ok(StereoBinding { left, right })
    }
}

/// Writes `samples` into the bound channel, narrowing to the hardware's sample type.
pub fn write_channel<T>(
    buffers: &mut [HardwareBuffer<'_, T>],
    binding: &OutputBinding,
    samples: &[f64],
) where
    T: Sample + FromSample<f64>,
{
    let Some(data) = buffers
        .get_mut(binding.buffer)
        .and_then(|buffer| buffer.data.as_deref_mut())
    else {
        return;
    };
    for (frame, sample) in samples.iter().take(binding.frame_count).enumerate() {
        data[binding.sample_index(frame)] = T::from_sample(*sample);
    }
}

/// Reads the bound channel back as f64 samples.
pub fn read_channel<T>(buffers: &[HardwareBuffer<'_, T>], binding: &OutputBinding) -> Vec<f64>
where
    T: Sample,
    f64: FromSample<T>,
{
    let Some(data) = buffers
        .get(binding.buffer)
        .and_then(|buffer| buffer.data.as_deref())
    else {
        return Vec::new();
    };
    (0..binding.frame_count)
        .map(|frame| f64::from_sample(data[binding.sample_index(frame)]))
        .collect()
}

/// Writes the equilibrium value into every mapped buffer.
pub fn silence<T: Sample>(buffers: &mut [HardwareBuffer<'_, T>]) {
    for buffer in buffers.iter_mut() {
        if let Some(data) = buffer.data.as_deref_mut() {
            data.fill(T::EQUILIBRIUM);
        }
    }
}
