//! SlimStreamer Core - shared library for the SlimStreamer audio server.
//!
//! This crate provides the streaming coordinator at the heart of
//! SlimStreamer: per-rate audio capture, the SlimProto command codec and its
//! session state machines, and the Streamer that decides when every
//! connected client should start (and stay in sync) playing.
//!
//! # Architecture
//!
//! - [`chunk`]: the immutable unit of audio passed from capture to fan-out
//! - [`buffer`]: the bounded single-producer/single-consumer ring buffer
//! - [`capture`]: per-sampling-rate capture pipelines and their PCM backend
//! - [`encoder`]: repacking captured audio into a client's wire format
//! - [`proto`]: the SlimProto codec, session state machines and the
//!   Streamer coordinator
//! - [`events`]: event system for observing the streaming core from outside
//! - [`runtime`]: task spawning abstraction for async runtime independence
//! - [`config`]: runtime configuration
//! - [`error`]: centralized error types
//! - [`bootstrap`]: composition root wiring everything together

#![warn(clippy::all)]

pub mod bootstrap;
pub mod buffer;
pub mod capture;
pub mod chunk;
pub mod config;
pub mod encoder;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod proto;
pub mod runtime;
pub mod utils;

pub use bootstrap::{BootstrappedServices, Bootstrapper};
pub use chunk::Chunk;
pub use config::Config;
pub use error::{CaptureError, ConfigError, ProtocolError, SlimStreamerError, SlimStreamerResult};
pub use events::{
    BroadcastEventBridge, CaptureEvent, CaptureHealth, EventEmitter, LoggingEventEmitter,
    NoopEventEmitter, SessionEvent, StateEvent, StreamerEvent,
};
pub use proto::{Scheduler, Streamer, StreamerState};
pub use runtime::{TaskSpawner, TokioSpawner};
