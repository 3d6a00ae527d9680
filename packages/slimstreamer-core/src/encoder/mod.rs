//! Sample repacking from the capture pipeline's internal 32-bit format to
//! the bit depth and endianness a SlimProto client negotiated.
//!
//! There is no transcoding here, only truncation: an [`Encoder`] narrows
//! each 32-bit signed sample to 16 or 24 bits (or passes 32-bit through
//! unchanged) and reorders bytes for the client's requested endianness. The
//! [`EncoderBuilder`] interface is shaped so a future codec (FLAC, say)
//! could be registered alongside [`PcmEncoder`] without touching callers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::chunk::Chunk;

/// Wire endianness a client negotiated for its PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Output format of an [`Encoder`], reported to the command session so it
/// can fill in the STRM:start format fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFormat {
    pub bits_per_sample: u16,
    pub endianness: Endianness,
}

/// Narrows and reframes captured audio for one streaming session.
pub trait Encoder: Send {
    /// Encodes one chunk's audio into wire bytes. Marker chunks (rate == 0)
    /// produce no bytes.
    fn encode(&mut self, chunk: &Chunk) -> Bytes;

    /// Flushes any buffered partial output. The PCM encoder never buffers
    /// across chunks, so this is a no-op; encoders with internal state
    /// (e.g. a block-based codec) would drain it here.
    fn flush(&mut self) -> Bytes;

    fn format(&self) -> EncodedFormat;
    fn sampling_rate(&self) -> u32;
    fn set_sampling_rate(&mut self, rate: u32);
}

/// Bit-depth-narrowing, endianness-reframing PCM encoder.
pub struct PcmEncoder {
    sampling_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    endianness: Endianness,
}

impl PcmEncoder {
    fn new(sampling_rate: u32, channels: u16, bits_per_sample: u16, endianness: Endianness) -> Self {
        assert!(
            matches!(bits_per_sample, 16 | 24 | 32),
            "unsupported PCM bit depth: {bits_per_sample}"
        );
        Self {
            sampling_rate,
            channels,
            bits_per_sample,
            endianness,
        }
    }

    fn write_sample(&self, out: &mut BytesMut, sample: i32) {
        match (self.bits_per_sample, self.endianness) {
            (32, Endianness::Little) => out.put_i32_le(sample),
            (32, Endianness::Big) => out.put_i32(sample),
            (16, Endianness::Little) => out.put_i16_le((sample >> 16) as i16),
            (16, Endianness::Big) => out.put_i16((sample >> 16) as i16),
            (24, endianness) => {
                let widened = sample >> 8;
                let le = widened.to_le_bytes();
                match endianness {
                    Endianness::Little => out.put_slice(&le[0..3]),
                    Endianness::Big => out.put_slice(&[le[2], le[1], le[0]]),
                }
            }
            (bits, _) => unreachable!("unsupported PCM bit depth: {bits}"),
        }
    }
}

impl Encoder for PcmEncoder {
    fn encode(&mut self, chunk: &Chunk) -> Bytes {
        if chunk.is_marker() {
            return Bytes::new();
        }
        let sample_count = chunk.payload().len() / 4;
        let mut out = BytesMut::with_capacity(sample_count * (self.bits_per_sample as usize / 8));
        for raw in chunk.payload().chunks_exact(4) {
            let sample = i32::from_ne_bytes(raw.try_into().expect("chunk payload is 4-byte aligned"));
            self.write_sample(&mut out, sample);
        }
        out.freeze()
    }

    fn flush(&mut self) -> Bytes {
        Bytes::new()
    }

    fn format(&self) -> EncodedFormat {
        EncodedFormat {
            bits_per_sample: self.bits_per_sample,
            endianness: self.endianness,
        }
    }

    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn set_sampling_rate(&mut self, rate: u32) {
        self.sampling_rate = rate;
    }
}

/// Configures an [`Encoder`] ahead of streaming-session construction.
pub struct EncoderBuilder {
    channels: u16,
    bits_per_sample: u16,
    endianness: Endianness,
}

impl EncoderBuilder {
    /// PCM output at the given bit depth and endianness. 16 and 24-bit
    /// narrow each 32-bit capture sample; 32-bit passes through unchanged.
    pub fn pcm(channels: u16, bits_per_sample: u16, endianness: Endianness) -> Self {
        Self {
            channels,
            bits_per_sample,
            endianness,
        }
    }

    pub fn build(&self, sampling_rate: u32) -> Box<dyn Encoder> {
        Box::new(PcmEncoder::new(
            sampling_rate,
            self.channels,
            self.bits_per_sample,
            self.endianness,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn chunk_from_i32_samples(samples: &[i32]) -> Chunk {
        let mut payload = BytesMut::with_capacity(samples.len() * 4);
        for s in samples {
            payload.put_i32_ne(*s);
        }
        Chunk::data(48_000, 2, (samples.len() / 2) as u64, payload.freeze(), Instant::now())
    }

    #[test]
    fn pcm_16_bit_truncates_by_arithmetic_shift() {
        let mut encoder = PcmEncoder::new(48_000, 2, 16, Endianness::Little);
        let chunk = chunk_from_i32_samples(&[0x1234_5678, -1]);
        let encoded = encoder.encode(&chunk);
        assert_eq!(encoded.len(), 4);
        assert_eq!(i16::from_le_bytes([encoded[0], encoded[1]]), 0x1234);
        assert_eq!(i16::from_le_bytes([encoded[2], encoded[3]]), -1);
    }

    #[test]
    fn pcm_32_bit_passes_through_unchanged() {
        let mut encoder = PcmEncoder::new(48_000, 2, 32, Endianness::Little);
        let chunk = chunk_from_i32_samples(&[42, -42]);
        let encoded = encoder.encode(&chunk);
        assert_eq!(i32::from_le_bytes(encoded[0..4].try_into().unwrap()), 42);
        assert_eq!(i32::from_le_bytes(encoded[4..8].try_into().unwrap()), -42);
    }

    #[test]
    fn marker_chunks_encode_to_nothing() {
        let mut encoder = PcmEncoder::new(48_000, 2, 16, Endianness::Little);
        let marker = Chunk::marker(true, Instant::now());
        assert_eq!(encoder.encode(&marker).len(), 0);
    }

    #[test]
    fn builder_reports_requested_format() {
        let builder = EncoderBuilder::pcm(2, 24, Endianness::Big);
        let encoder = builder.build(44_100);
        assert_eq!(encoder.sampling_rate(), 44_100);
        assert_eq!(
            encoder.format(),
            EncodedFormat {
                bits_per_sample: 24,
                endianness: Endianness::Big
            }
        );
    }
}
