//! Owns one ring buffer and one dedicated OS thread per sampling rate,
//! turning a [`CaptureSource`] into a stream of [`Chunk`]s the scheduler can
//! pull from.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::buffer::RingBuffer;
use crate::chunk::Chunk;
use crate::events::{CaptureEvent, CaptureHealth, EventEmitter};
use crate::protocol_constants::CAPTURE_START_THRESHOLD_CHUNKS;
use crate::utils::now_millis;

use super::{CaptureSource, StreamMarker};

/// How long `produce_chunk` asks the scheduler to wait before polling again
/// when the consumer refused the head chunk, or the buffer ran dry before
/// the stream ended (both are transient "try again shortly" conditions).
const DEFER_MS: u64 = 10;

/// Number of consecutive unrecoverable read errors before a pipeline gives
/// up on its device and reports itself unhealthy.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// A running capture pipeline for a single sampling rate.
pub struct CapturePipeline {
    sampling_rate: u32,
    ring: Arc<RingBuffer<Chunk>>,
    chunk_counter: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Spawns the capture thread and returns immediately; the thread opens
    /// `source` and begins filling the ring buffer in the background.
    pub fn start<S>(source: S, ring_capacity: usize, events: Arc<dyn EventEmitter>) -> Self
    where
        S: CaptureSource + 'static,
    {
        let sampling_rate = source.sampling_rate();
        let ring = Arc::new(RingBuffer::new(ring_capacity));
        let chunk_counter = Arc::new(AtomicU64::new(0));
        let healthy = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_handle = {
            let ring = ring.clone();
            let chunk_counter = chunk_counter.clone();
            let healthy = healthy.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name(format!("capture-{sampling_rate}"))
                .spawn(move || run(source, ring, chunk_counter, healthy, shutdown, events))
                .expect("failed to spawn capture thread")
        };

        Self {
            sampling_rate,
            ring,
            chunk_counter,
            healthy,
            shutdown,
            thread_handle: Some(thread_handle),
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Offers the head chunk to `consumer`, subject to the start-threshold
    /// gate. Returns `None` before the threshold is reached or when the
    /// buffer is empty, `Some(0)` when `consumer` accepted the chunk, and
    /// `Some(ms)` when it was refused and the scheduler should retry later.
    pub fn produce_chunk(&self, mut consumer: impl FnMut(&mut Chunk) -> bool) -> Option<u64> {
        if self.chunk_counter.load(Ordering::Acquire) <= CAPTURE_START_THRESHOLD_CHUNKS as u64 {
            return None;
        }

        let mut result = None;
        self.ring.dequeue(
            |chunk| {
                let end_of_stream = chunk.end_of_stream();
                let accepted = consumer(chunk);
                if accepted {
                    result = Some(0);
                    if end_of_stream {
                        self.chunk_counter.store(0, Ordering::Release);
                    }
                } else {
                    result = Some(DEFER_MS);
                }
                accepted
            },
            || {},
        );
        result
    }

    /// Signals the capture thread to stop and waits for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<S: CaptureSource>(
    mut source: S,
    ring: Arc<RingBuffer<Chunk>>,
    chunk_counter: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    events: Arc<dyn EventEmitter>,
) {
    let sampling_rate = source.sampling_rate();
    let channels = source.channels();

    if let Err(err) = source.open() {
        log::error!("capture pipeline {sampling_rate}Hz failed to open: {err}");
        healthy.store(false, Ordering::Release);
        events.emit_capture(CaptureEvent::HealthChanged {
            sampling_rate,
            health: CaptureHealth::Unhealthy,
            reason: Some(err.to_string()),
            timestamp: now_millis(),
        });
        return;
    }

    let mut consecutive_errors = 0u32;

    while !shutdown.load(Ordering::Acquire) {
        match source.read_period() {
            Ok(period) => {
                consecutive_errors = 0;
                match period.marker {
                    StreamMarker::EndOfStream => {
                        ring.enqueue(
                            || Chunk::marker(true, Instant::now()),
                            || log::warn!("capture pipeline {sampling_rate}Hz dropped end-of-stream marker: buffer full"),
                        );
                    }
                    StreamMarker::BeginningOfStream | StreamMarker::Data => {
                        let captured_at = Instant::now();
                        let frames = period.frames;
                        let audio = period.audio.clone();
                        ring.enqueue(
                            || Chunk::data(sampling_rate, channels, frames, audio, captured_at),
                            || log::warn!("capture pipeline {sampling_rate}Hz dropped a period: buffer full"),
                        );
                        chunk_counter.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                log::warn!("capture pipeline {sampling_rate}Hz read error: {err}");
                if consecutive_errors > MAX_CONSECUTIVE_ERRORS || source.recover(&err).is_err() {
                    log::error!(
                        "capture pipeline {sampling_rate}Hz giving up after {consecutive_errors} consecutive errors"
                    );
                    healthy.store(false, Ordering::Release);
                    events.emit_capture(CaptureEvent::HealthChanged {
                        sampling_rate,
                        health: CaptureHealth::Unhealthy,
                        reason: Some(err.to_string()),
                        timestamp: now_millis(),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticSource;
    use crate::events::NoopEventEmitter;
    use std::time::Duration;

    fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn produce_chunk_is_none_before_start_threshold() {
        let source = SyntheticSource::new(48_000, 2, 16);
        let pipeline = CapturePipeline::start(source, 32, Arc::new(NoopEventEmitter));
        assert_eq!(pipeline.produce_chunk(|_| true), None);
    }

    #[test]
    fn produce_chunk_yields_data_once_threshold_is_passed() {
        let source = SyntheticSource::new(48_000, 2, 16);
        let mut pipeline = CapturePipeline::start(source, 256, Arc::new(NoopEventEmitter));

        let reached = wait_until(
            || pipeline.produce_chunk(|_| false).is_some(),
            Duration::from_secs(2),
        );
        assert!(reached, "capture thread never passed the start threshold");

        let mut consumed = false;
        pipeline.produce_chunk(|_| {
            consumed = true;
            true
        });
        assert!(consumed);
        pipeline.stop();
    }
}
