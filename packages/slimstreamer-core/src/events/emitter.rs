//! Event emitter abstraction for decoupling the streaming core from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, which keeps the Streamer and its sessions testable and
//! leaves room for a different transport than the one provided here.

use super::{CaptureEvent, SessionEvent, StateEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a Streamer state-machine transition.
    fn emit_state(&self, event: StateEvent);

    /// Emits a command/streaming session lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a capture pipeline health event.
    fn emit_capture(&self, event: CaptureEvent);
}

/// No-op emitter for the headless default configuration.
///
/// SlimStreamer has no required UI surface to notify; this is the default
/// emitter until an operator wires up `BroadcastEventBridge` or their own.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_state(&self, _event: StateEvent) {}
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_capture(&self, _event: CaptureEvent) {}
}

/// Logging emitter: records every event at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_state(&self, event: StateEvent) {
        tracing::debug!(?event, "streamer_state_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_capture(&self, event: CaptureEvent) {
        tracing::debug!(?event, "capture_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        state_count: AtomicUsize,
        session_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                state_count: AtomicUsize::new(0),
                session_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_state(&self, _event: StateEvent) {
            self.state_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_session(&self, _event: SessionEvent) {
            self.session_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_capture(&self, _event: CaptureEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        use crate::proto::streamer::StreamerState;

        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_state(StateEvent::Transitioned {
            from: StreamerState::Stopped,
            to: StreamerState::Started,
            timestamp: 0,
        });
        emitter.emit_session(SessionEvent::CommandSessionOpened {
            client_id: "1".into(),
            timestamp: 0,
        });

        assert_eq!(emitter.state_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.session_count.load(Ordering::SeqCst), 1);
    }
}
