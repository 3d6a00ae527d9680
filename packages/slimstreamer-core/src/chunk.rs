//! The unit of audio the capture pipelines produce and the Streamer fans out.

use std::time::Instant;

use bytes::Bytes;

/// An immutable slice of captured audio, or an end-of-stream marker.
///
/// `payload` holds interleaved 32-bit signed samples in native-endian order,
/// one sample per channel per frame; encoders repack this into the wire
/// format a given client negotiated. A chunk with `sampling_rate == 0` is a
/// marker (see [`Chunk::is_marker`]) and carries no audio.
#[derive(Debug, Clone)]
pub struct Chunk {
    sampling_rate: u32,
    frames: u64,
    payload: Bytes,
    end_of_stream: bool,
    captured_at: Instant,
}

/// Bytes per sample in the capture pipeline's internal format (32-bit signed).
pub const BYTES_PER_SAMPLE: usize = 4;

impl Chunk {
    /// Builds a data-bearing chunk from a captured period.
    ///
    /// `payload.len()` must equal `frames * channels * BYTES_PER_SAMPLE`;
    /// this is a debug-only assertion since the invariant is established by
    /// the capture backend, not by external callers.
    pub fn data(sampling_rate: u32, channels: u16, frames: u64, payload: Bytes, captured_at: Instant) -> Self {
        debug_assert_eq!(
            payload.len() as u64,
            frames * channels as u64 * BYTES_PER_SAMPLE as u64,
            "chunk payload length does not match frames * channels * bytes_per_sample"
        );
        Self {
            sampling_rate,
            frames,
            payload,
            end_of_stream: false,
            captured_at,
        }
    }

    /// Builds a marker chunk: end-of-stream if `end_of_stream`, otherwise a
    /// pure silence/keepalive marker. Markers carry no payload and their
    /// sampling rate is always zero.
    pub fn marker(end_of_stream: bool, captured_at: Instant) -> Self {
        Self {
            sampling_rate: 0,
            frames: 0,
            payload: Bytes::new(),
            end_of_stream,
            captured_at,
        }
    }

    /// A chunk with `sampling_rate == 0` carries no audio: it signals either
    /// end-of-stream or a keepalive tick, never data to encode.
    pub fn is_marker(&self) -> bool {
        self.sampling_rate == 0
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_chunk_is_not_a_marker() {
        let chunk = Chunk::data(48_000, 2, 10, Bytes::from(vec![0u8; 10 * 2 * 4]), Instant::now());
        assert!(!chunk.is_marker());
        assert_eq!(chunk.frames(), 10);
    }

    #[test]
    fn end_of_stream_marker_carries_no_payload() {
        let chunk = Chunk::marker(true, Instant::now());
        assert!(chunk.is_marker());
        assert!(chunk.end_of_stream());
        assert_eq!(chunk.payload().len(), 0);
    }
}
