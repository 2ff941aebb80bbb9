//! Error types for micros

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MicrosError {
    #[error("Clock unavailable: {0}")]
    ClockUnavailable(String),

    #[error("No default output device available")]
    NoOutputDevice,

    #[error("Stereo channels unresolved (left: {left:?}, right: {right:?})")]
    ChannelUnresolved {
        left: Option<u32>,
        right: Option<u32>,
    },

    #[error("Stream {stream} rejected format: {reason}")]
    FormatRejected { stream: u32, reason: String },

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MicrosError {
    /// Negotiation failures after which the demo keeps running without sound.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::NoOutputDevice | Self::ChannelUnresolved { .. } | Self::FormatRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MicrosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_failures_are_fatal_at_startup() {
        assert!(MicrosError::NoOutputDevice.is_fatal_at_startup());
        assert!(
            MicrosError::ChannelUnresolved {
                left: Some(1),
                right: None
            }
            .is_fatal_at_startup()
        );
        assert!(
            MicrosError::FormatRejected {
                stream: 3,
                reason: "busy".into()
            }
            .is_fatal_at_startup()
        );
        assert!(!MicrosError::Engine("boom".into()).is_fatal_at_startup());
    }

    #[test]
    fn display_names_the_missing_slot() {
        let err = MicrosError::ChannelUnresolved {
            left: Some(1),
            right: None,
        };
        assert_eq!(
            err.to_string(),
            "Stereo channels unresolved (left: Some(1), right: None)"
        );
    }
}
