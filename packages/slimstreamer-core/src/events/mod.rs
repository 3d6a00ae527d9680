//! Event system for observing the streaming core from the outside.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`StreamerEvent`] and its inner categories
//!
//! The core never depends on how (or whether) these events leave the process;
//! see [`BroadcastEventBridge`](super::events::bridge::BroadcastEventBridge) for
//! one transport binding.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::proto::streamer::StreamerState;

/// Events emitted by the streaming core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum StreamerEvent {
    /// The Streamer's global state machine transitioned.
    State(StateEvent),
    /// A SlimProto or HTTP audio session connected or disconnected.
    Session(SessionEvent),
    /// A capture pipeline's health changed.
    Capture(CaptureEvent),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateEvent {
    Transitioned {
        from: StreamerState,
        to: StreamerState,
        timestamp: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    CommandSessionOpened { client_id: String, timestamp: u64 },
    CommandSessionClosed { client_id: String, timestamp: u64 },
    StreamingSessionOpened { client_id: String, timestamp: u64 },
    StreamingSessionClosed { client_id: String, timestamp: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureHealth {
    #[default]
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    HealthChanged {
        sampling_rate: u32,
        health: CaptureHealth,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: u64,
    },
}

impl From<StateEvent> for StreamerEvent {
    fn from(event: StateEvent) -> Self {
        StreamerEvent::State(event)
    }
}

impl From<SessionEvent> for StreamerEvent {
    fn from(event: SessionEvent) -> Self {
        StreamerEvent::Session(event)
    }
}

impl From<CaptureEvent> for StreamerEvent {
    fn from(event: CaptureEvent) -> Self {
        StreamerEvent::Capture(event)
    }
}
