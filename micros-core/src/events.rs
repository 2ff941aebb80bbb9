//! Event types emitted by the engine

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a single callback invocation produced silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The left or right hardware channel was not present in the delivered buffers.
    UnboundOutput,
    /// The hardware reported different frame counts for left and right.
    FrameCountMismatch { left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MicrosEvent {
    EngineStarted,
    EngineStopped,
    InvocationSkipped {
        reason: SkipReason,
    },
    /// The device consumed audio faster than it was supplied.
    Underrun,
    /// A blocking write failed even after the recovery primitive ran.
    RecoveryFailed {
        frames: usize,
    },
    /// The device position could not be queried for this many consecutive periods.
    PositionUnavailable {
        consecutive: u32,
    },
    DriftClamped {
        drift_micros: i64,
    },
    StreamError {
        error: String,
    },
}

impl MicrosEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Underrun
                | Self::RecoveryFailed { .. }
                | Self::PositionUnavailable { .. }
                | Self::StreamError { .. }
        )
    }
}

/// Non-blocking sending half handed to the audio thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<MicrosEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queues an event without blocking; a full queue drops it and counts the loss.
    pub fn emit(&self, event: MicrosEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Host side of the event queue.
#[derive(Debug)]
pub struct EventQueue {
    sender: EventSender,
    receiver: Receiver<MicrosEvent>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender: EventSender {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Drains all pending events.
    pub fn poll(&self) -> Vec<MicrosEvent> {
        self.receiver.try_iter().collect()
    }

    /// Number of events lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.sender.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_drains_in_order() {
        let queue = EventQueue::new(4);
        let sender = queue.sender();
        sender.emit(MicrosEvent::EngineStarted);
        sender.emit(MicrosEvent::Underrun);

        assert_eq!(
            queue.poll(),
            vec![MicrosEvent::EngineStarted, MicrosEvent::Underrun]
        );
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let queue = EventQueue::new(1);
        let sender = queue.sender();
        sender.emit(MicrosEvent::EngineStarted);
        sender.emit(MicrosEvent::EngineStopped);
        sender.emit(MicrosEvent::Underrun);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.poll(), vec![MicrosEvent::EngineStarted]);
    }

    #[test]
    fn error_classification() {
        assert!(MicrosEvent::Underrun.is_error());
        assert!(MicrosEvent::RecoveryFailed { frames: 12 }.is_error());
        assert!(!MicrosEvent::EngineStarted.is_error());
        assert!(
            !MicrosEvent::InvocationSkipped {
                reason: SkipReason::UnboundOutput
            }
            .is_error()
        );
    }
}
