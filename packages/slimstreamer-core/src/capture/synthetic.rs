//! Deterministic capture source with no hardware dependency, used in unit
//! tests and in CI where no sound card is present.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CaptureError;

use super::{CapturedPeriod, CaptureSource, StreamMarker};

/// Produces silent periods of a fixed size, optionally ending the stream
/// after a configured number of periods.
pub struct SyntheticSource {
    sampling_rate: u32,
    channels: u16,
    frames_per_period: u64,
    periods_remaining: Option<u64>,
    emitted_first_period: bool,
}

impl SyntheticSource {
    pub fn new(sampling_rate: u32, channels: u16, frames_per_period: u64) -> Self {
        Self {
            sampling_rate,
            channels,
            frames_per_period,
            periods_remaining: None,
            emitted_first_period: false,
        }
    }

    /// Ends the stream (one `EndOfStream` period) after `count` data periods.
    pub fn ending_after(mut self, count: u64) -> Self {
        self.periods_remaining = Some(count);
        self
    }
}

impl CaptureSource for SyntheticSource {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn read_period(&mut self) -> Result<CapturedPeriod, CaptureError> {
        if let Some(remaining) = self.periods_remaining {
            if remaining == 0 {
                return Ok(CapturedPeriod {
                    marker: StreamMarker::EndOfStream,
                    frames: 0,
                    audio: Bytes::new(),
                });
            }
            self.periods_remaining = Some(remaining - 1);
        }

        let marker = if !self.emitted_first_period {
            self.emitted_first_period = true;
            StreamMarker::BeginningOfStream
        } else {
            StreamMarker::Data
        };

        let mut audio =
            BytesMut::with_capacity(self.frames_per_period as usize * self.channels as usize * 4);
        for _ in 0..(self.frames_per_period * self.channels as u64) {
            audio.put_i32_ne(0);
        }

        Ok(CapturedPeriod {
            marker,
            frames: self.frames_per_period,
            audio: audio.freeze(),
        })
    }

    fn recover(&mut self, _error: &CaptureError) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_period_is_beginning_of_stream() {
        let mut source = SyntheticSource::new(48_000, 2, 64);
        let period = source.read_period().unwrap();
        assert_eq!(period.marker, StreamMarker::BeginningOfStream);
        assert_eq!(period.frames, 64);
    }

    #[test]
    fn ending_after_count_emits_end_of_stream() {
        let mut source = SyntheticSource::new(48_000, 2, 64).ending_after(2);
        assert_ne!(source.read_period().unwrap().marker, StreamMarker::EndOfStream);
        assert_ne!(source.read_period().unwrap().marker, StreamMarker::EndOfStream);
        assert_eq!(source.read_period().unwrap().marker, StreamMarker::EndOfStream);
    }
}
