//! Audio capture: turning a sound device's raw periods into [`Chunk`]s.
//!
//! A capture device is opened with one extra channel beyond the audio
//! channels, carrying a per-frame marker byte the device driver writes
//! alongside the samples; [`CaptureSource`] implementations strip that
//! channel out and report its first frame's marker via [`StreamMarker`].

mod alsa_source;
mod pipeline;
mod synthetic;

pub use alsa_source::AlsaSource;
pub use pipeline::CapturePipeline;
pub use synthetic::SyntheticSource;

use bytes::Bytes;

use crate::error::CaptureError;

/// What a captured period's command channel said about the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMarker {
    BeginningOfStream,
    Data,
    EndOfStream,
}

/// One hardware period's worth of audio, with the command channel already
/// stripped out by the backend.
pub struct CapturedPeriod {
    pub marker: StreamMarker,
    pub frames: u64,
    /// Interleaved audio-channel samples only, 32-bit signed, native endian.
    pub audio: Bytes,
}

/// A source of captured audio periods, one sampling rate per instance.
///
/// Implementations are driven from a dedicated OS thread (see
/// [`CapturePipeline`]); none of these methods are async.
pub trait CaptureSource: Send {
    fn sampling_rate(&self) -> u32;
    fn channels(&self) -> u16;

    /// Opens the underlying device. Called once before the first
    /// `read_period`.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Blocks until one hardware period is available and returns it.
    fn read_period(&mut self) -> Result<CapturedPeriod, CaptureError>;

    /// Attempts to recover from a transient error (xrun, suspend) reported by
    /// `read_period`. Returns `Ok(())` if the device is usable again.
    fn recover(&mut self, error: &CaptureError) -> Result<(), CaptureError>;
}
