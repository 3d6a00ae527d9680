//! ALSA-backed [`CaptureSource`].
//!
//! The device is opened with `channels + 1`: the extra channel carries a
//! per-frame command byte written by the capture card's driver
//! (beginning-of-stream / data / end-of-stream), which this source strips
//! out before handing audio-only bytes to the pipeline.

use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CaptureError;

use super::{CapturedPeriod, CaptureSource, StreamMarker};

const PERIOD_FRAMES: i64 = 1024;
const BUFFER_PERIODS: i64 = 4;

/// Command-channel values written by the capture device, one per frame.
mod command_byte {
    pub const BEGINNING_OF_STREAM: i32 = 1;
    pub const END_OF_STREAM: i32 = 2;
    pub const DATA: i32 = 3;
}

pub struct AlsaSource {
    device: String,
    sampling_rate: u32,
    channels: u16,
    pcm: Option<PCM>,
}

impl AlsaSource {
    pub fn new(device: impl Into<String>, sampling_rate: u32, channels: u16) -> Self {
        Self {
            device: device.into(),
            sampling_rate,
            channels,
            pcm: None,
        }
    }

    fn hw_channels(&self) -> u32 {
        self.channels as u32 + 1
    }

    fn open_error(&self, source: alsa::Error) -> CaptureError {
        CaptureError::Open {
            device: self.device.clone(),
            source,
        }
    }

    fn unrecoverable(&self, source: alsa::Error) -> CaptureError {
        CaptureError::Unrecoverable {
            device: self.device.clone(),
            source,
        }
    }

    fn configure(&self, pcm: &PCM) -> Result<(), alsa::Error> {
        let hwp = HwParams::any(pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::s32())?;
        hwp.set_rate(self.sampling_rate, ValueOr::Nearest)?;
        hwp.set_channels(self.hw_channels())?;
        hwp.set_period_size_near(PERIOD_FRAMES, ValueOr::Nearest)?;
        hwp.set_buffer_size_near(PERIOD_FRAMES * BUFFER_PERIODS)?;
        pcm.hw_params(&hwp)?;

        let swp = pcm.sw_params_current()?;
        swp.set_start_threshold(
            crate::protocol_constants::CAPTURE_START_THRESHOLD_CHUNKS as i64 * PERIOD_FRAMES,
        )?;
        pcm.sw_params(&swp)?;
        Ok(())
    }
}

impl CaptureSource for AlsaSource {
    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let pcm = PCM::new(&self.device, Direction::Capture, false)
            .map_err(|e| self.open_error(e))?;
        self.configure(&pcm).map_err(|e| self.open_error(e))?;
        pcm.prepare().map_err(|e| self.open_error(e))?;
        self.pcm = Some(pcm);
        Ok(())
    }

    fn read_period(&mut self) -> Result<CapturedPeriod, CaptureError> {
        let pcm = self.pcm.as_ref().expect("read_period called before open");
        let io = pcm.io_i32().map_err(|e| self.unrecoverable(e))?;

        let hw_channels = self.hw_channels() as usize;
        let mut raw = vec![0i32; PERIOD_FRAMES as usize * hw_channels];
        let frames_read = io
            .readi(&mut raw)
            .map_err(|e| self.unrecoverable(e))? as u64;

        // The command channel is the last of the hw_channels interleaved
        // samples per frame, not the first: only its first frame's value is
        // examined, matching the reference capture source's per-chunk marker.
        let command_value = raw.get(self.channels as usize).copied().unwrap_or(command_byte::DATA);
        let marker = match command_value {
            command_byte::BEGINNING_OF_STREAM => StreamMarker::BeginningOfStream,
            command_byte::END_OF_STREAM => StreamMarker::EndOfStream,
            _ => StreamMarker::Data,
        };

        let mut audio = BytesMut::with_capacity(frames_read as usize * self.channels as usize * 4);
        for frame in raw.chunks_exact(hw_channels).take(frames_read as usize) {
            for sample in &frame[..self.channels as usize] {
                audio.put_i32_ne(*sample);
            }
        }

        Ok(CapturedPeriod {
            marker,
            frames: frames_read,
            audio: Bytes::from(audio),
        })
    }

    fn recover(&mut self, error: &CaptureError) -> Result<(), CaptureError> {
        let pcm = self.pcm.as_ref().expect("recover called before open");
        let code = match error {
            CaptureError::Unrecoverable { source, .. } => source.errno() as i32,
            CaptureError::Open { source, .. } => source.errno() as i32,
        };
        pcm.recover(code, true).map_err(|e| self.unrecoverable(e))?;
        if pcm.state() != State::Running && pcm.state() != State::Prepared {
            pcm.prepare().map_err(|e| self.unrecoverable(e))?;
        }
        Ok(())
    }
}
