//! The Streamer: the single coordinator tying capture pipelines to every
//! connected client's command and streaming sessions.
//!
//! Its state machine and `consume_chunk`/`stream_chunk` algorithms are a
//! direct port of a single-process C++ stream coordinator's design, adapted
//! to Rust's ownership model: session collections are `DashMap`s so the
//! scheduler (driving `consume_chunk` from one thread) and the SlimProto/
//! HTTP acceptors (registering and removing sessions from tokio tasks) can
//! touch the Streamer concurrently without a global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::UnboundedSender;

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::encoder::EncoderBuilder;
use crate::error::ProtocolError;
use crate::events::{EventEmitter, SessionEvent, StateEvent};
use crate::protocol_constants::{
    PLAYBACK_DELAY_SLACK_US, READY_TO_BUFFER_TIMEOUT_MS, READY_TO_PLAY_MIN_STREAMING_MS,
};
use crate::utils::now_millis;

use super::codec::StrmStartParams;
use super::command_session::CommandSession;
use super::streaming_session::StreamingSession;

/// Streamer state-machine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Prepare,
    Buffer,
    Play,
    Drain,
    Flushed,
    Stop,
}

/// Streamer state-machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamerState {
    Stopped,
    Started,
    Preparing,
    Buffering,
    Playing,
    Draining,
}

struct StreamerInner {
    state: StreamerState,
    sampling_rate: u32,
    preparing_started_at: Option<Instant>,
    buffering_started_at: Option<Instant>,
    playback_started_at: Option<Instant>,
    streamed_chunks: u64,
    streamed_frames: u64,
    /// Frames the Streamer expects to have buffered by the time playback
    /// starts. Computed once, when entering `Playing`; not read anywhere
    /// downstream today, but kept because it mirrors a value every consumer
    /// of the upstream transition table expects to be able to query.
    #[allow(dead_code)]
    buffered_frames: u64,
}

type Guard = fn(&Streamer, &StreamerInner, Instant) -> bool;
type Action = fn(&Streamer, &mut StreamerInner, Instant);

struct TransitionRow {
    event: Event,
    from: StreamerState,
    to: StreamerState,
    guard: Guard,
    action: Action,
}

fn always(_: &Streamer, _: &StreamerInner, _: Instant) -> bool {
    true
}

fn nothing(_: &Streamer, _: &mut StreamerInner, _: Instant) {}

use StreamerState::*;

const TRANSITIONS: &[TransitionRow] = &[
    TransitionRow { event: Event::Start, from: Started, to: Started, guard: always, action: nothing },
    TransitionRow { event: Event::Start, from: Preparing, to: Preparing, guard: always, action: nothing },
    TransitionRow { event: Event::Start, from: Buffering, to: Buffering, guard: always, action: nothing },
    TransitionRow { event: Event::Start, from: Playing, to: Playing, guard: always, action: nothing },
    TransitionRow { event: Event::Start, from: Draining, to: Draining, guard: always, action: nothing },
    TransitionRow { event: Event::Start, from: Stopped, to: Started, guard: always, action: nothing },
    TransitionRow { event: Event::Prepare, from: Started, to: Preparing, guard: always, action: Streamer::state_change_to_preparing },
    TransitionRow { event: Event::Prepare, from: Preparing, to: Preparing, guard: always, action: nothing },
    TransitionRow { event: Event::Buffer, from: Preparing, to: Buffering, guard: Streamer::is_ready_to_buffer, action: Streamer::state_change_to_buffering },
    TransitionRow { event: Event::Buffer, from: Buffering, to: Buffering, guard: always, action: nothing },
    TransitionRow { event: Event::Buffer, from: Playing, to: Playing, guard: always, action: nothing },
    TransitionRow { event: Event::Play, from: Buffering, to: Playing, guard: Streamer::is_ready_to_play, action: Streamer::state_change_to_playing },
    TransitionRow { event: Event::Play, from: Playing, to: Playing, guard: always, action: nothing },
    TransitionRow { event: Event::Drain, from: Preparing, to: Draining, guard: always, action: Streamer::state_change_to_draining },
    TransitionRow { event: Event::Drain, from: Buffering, to: Draining, guard: always, action: Streamer::state_change_to_draining },
    TransitionRow { event: Event::Drain, from: Playing, to: Draining, guard: always, action: Streamer::state_change_to_draining },
    TransitionRow { event: Event::Drain, from: Draining, to: Draining, guard: always, action: nothing },
    TransitionRow { event: Event::Drain, from: Started, to: Started, guard: always, action: nothing },
    TransitionRow { event: Event::Flushed, from: Started, to: Started, guard: always, action: nothing },
    TransitionRow { event: Event::Flushed, from: Playing, to: Playing, guard: always, action: nothing },
    TransitionRow { event: Event::Flushed, from: Draining, to: Started, guard: Streamer::is_not_draining, action: nothing },
    TransitionRow { event: Event::Stop, from: Stopped, to: Stopped, guard: always, action: nothing },
    TransitionRow { event: Event::Stop, from: Started, to: Stopped, guard: always, action: Streamer::state_change_to_stopped },
    TransitionRow { event: Event::Stop, from: Preparing, to: Stopped, guard: always, action: Streamer::state_change_to_stopped },
    TransitionRow { event: Event::Stop, from: Buffering, to: Stopped, guard: always, action: Streamer::state_change_to_stopped },
    TransitionRow { event: Event::Stop, from: Playing, to: Stopped, guard: always, action: Streamer::state_change_to_stopped },
    TransitionRow { event: Event::Stop, from: Draining, to: Stopped, guard: always, action: Streamer::state_change_to_stopped },
];

/// The central coordinator. One instance per server process.
pub struct Streamer {
    streaming_port: u16,
    encoder_builder: EncoderBuilder,
    inner: parking_lot::Mutex<StreamerInner>,
    command_sessions: DashMap<String, CommandSession>,
    streaming_sessions: DashMap<String, StreamingSession>,
    /// Next expected chunk index per client, for fan-out completion
    /// tracking: a session that already consumed the current chunk is
    /// skipped on retry, so one slow client doesn't cause every other
    /// client to receive the same chunk twice.
    cursors: DashMap<String, u64>,
    next_client_id: std::sync::atomic::AtomicU64,
    events: std::sync::Arc<dyn EventEmitter>,
}

impl Streamer {
    pub fn new(streaming_port: u16, encoder_builder: EncoderBuilder, events: std::sync::Arc<dyn EventEmitter>) -> Self {
        Self {
            streaming_port,
            encoder_builder,
            inner: parking_lot::Mutex::new(StreamerInner {
                state: StreamerState::Stopped,
                sampling_rate: 0,
                preparing_started_at: None,
                buffering_started_at: None,
                playback_started_at: None,
                streamed_chunks: 0,
                streamed_frames: 0,
                buffered_frames: 0,
            }),
            command_sessions: DashMap::new(),
            streaming_sessions: DashMap::new(),
            cursors: DashMap::new(),
            next_client_id: std::sync::atomic::AtomicU64::new(0),
            events,
        }
    }

    pub fn state(&self) -> StreamerState {
        self.inner.lock().state
    }

    pub fn sampling_rate(&self) -> u32 {
        self.inner.lock().sampling_rate
    }

    pub fn is_running(&self) -> bool {
        self.state() != StreamerState::Stopped
    }

    pub fn is_playing(&self) -> bool {
        self.state() == StreamerState::Playing
    }

    pub fn start(&self, now: Instant) {
        if !self.process_event(Event::Start, now) {
            log::error!("invalid streamer state while processing start event");
        }
    }

    pub fn stop(&self, now: Instant, on_stopped: impl FnOnce()) {
        if !self.process_event(Event::Stop, now) {
            log::error!("invalid streamer state while processing stop event");
        }
        on_stopped();
    }

    // ── Session registry ──────────────────────────────────────────────

    /// Registers a new SlimProto command connection, returning its assigned
    /// client ID.
    pub fn register_command_session(&self, out_tx: UnboundedSender<Bytes>) -> String {
        let id = self.next_client_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let client_id = id.to_string();
        self.command_sessions
            .insert(client_id.clone(), CommandSession::new(client_id.clone(), out_tx));
        self.cursors.insert(client_id.clone(), self.inner.lock().streamed_chunks);
        self.events.emit_session(SessionEvent::CommandSessionOpened {
            client_id: client_id.clone(),
            timestamp: now_millis(),
        });
        client_id
    }

    pub fn remove_command_session(&self, client_id: &str) {
        self.command_sessions.remove(client_id);
        self.cursors.remove(client_id);
        self.events.emit_session(SessionEvent::CommandSessionClosed {
            client_id: client_id.to_string(),
            timestamp: now_millis(),
        });
    }

    pub fn with_command_session<R>(&self, client_id: &str, f: impl FnOnce(&mut CommandSession) -> R) -> Option<R> {
        self.command_sessions.get_mut(client_id).map(|mut s| f(&mut s))
    }

    /// Sends a STRM:t latency ping to every connected command session. Run
    /// periodically from a background task while the streamer is active.
    pub fn ping_all_sessions(&self, server_timestamp: u32, now: Instant) {
        for mut session in self.command_sessions.iter_mut() {
            session.send_ping(server_timestamp, now);
        }
    }

    /// Attaches a client's HTTP audio connection, once its `player=` query
    /// parameter has been correlated with an existing command session.
    pub fn attach_streaming_session(&self, client_id: String, write_half: OwnedWriteHalf) -> Result<(), ProtocolError> {
        if !self.command_sessions.contains_key(&client_id) {
            return Err(ProtocolError::UnknownClientId(client_id));
        }
        let encoder = self.encoder_builder.build(self.sampling_rate());
        let mut session = StreamingSession::new(client_id.clone(), encoder, write_half);
        if let Err(e) = session.send_handshake() {
            log::warn!("failed to send HTTP handshake to client {client_id}: {e}");
        }
        self.streaming_sessions.insert(client_id.clone(), session);
        self.events.emit_session(SessionEvent::StreamingSessionOpened {
            client_id,
            timestamp: now_millis(),
        });
        Ok(())
    }

    pub fn detach_streaming_session(&self, client_id: &str) {
        if self.streaming_sessions.remove(client_id).is_some() {
            self.events.emit_session(SessionEvent::StreamingSessionClosed {
                client_id: client_id.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    pub fn streaming_port(&self) -> u16 {
        self.streaming_port
    }

    // ── Chunk consumption ─────────────────────────────────────────────

    /// Feeds one chunk from a capture pipeline through the state machine,
    /// fanning it out to every attached client once streaming is underway.
    ///
    /// Returns `true` if the chunk was fully handled (consumed or
    /// deliberately skipped) and the pipeline should advance past it;
    /// `false` if at least one client's socket was not ready and the same
    /// chunk should be offered again.
    pub fn consume_chunk(&self, chunk: &mut Chunk, now: Instant) -> bool {
        let mut result = false;

        if self.state() == StreamerState::Started {
            let chunk_rate = chunk.sampling_rate();
            if chunk_rate != 0 {
                self.inner.lock().sampling_rate = chunk_rate;
                if self.process_event(Event::Prepare, now) {
                    log::debug!("started streaming (rate={chunk_rate})");
                }
                result = false;
            } else {
                log::warn!("chunk skipped: invalid sampling rate (rate=0)");
                result = true;
            }
        }

        if self.state() == StreamerState::Preparing {
            result = self.process_event(Event::Buffer, now);
        }

        if matches!(self.state(), StreamerState::Buffering | StreamerState::Playing) {
            if self.state() == StreamerState::Buffering {
                self.process_event(Event::Play, now);
            }

            if self.sampling_rate() == chunk.sampling_rate() {
                result = self.stream_chunk(chunk);
            }

            if self.sampling_rate() != chunk.sampling_rate() || chunk.end_of_stream() {
                self.process_event(Event::Drain, now);
                result = false;
            }
        }

        if self.state() == StreamerState::Draining {
            let duration = frames_to_duration(self.inner.lock().streamed_frames, self.sampling_rate());
            result = self.process_event(Event::Flushed, now);
            if result && !duration.is_zero() {
                log::debug!("stopped streaming (duration={}ms)", duration.as_millis());
            }
        }

        result
    }

    fn stream_chunk(&self, chunk: &mut Chunk) -> bool {
        let streamed_chunks = self.inner.lock().streamed_chunks;
        let mut all_accepted = true;

        for entry in self.command_sessions.iter() {
            let client_id = entry.key();
            let mut cursor = self.cursors.entry(client_id.clone()).or_insert(0);
            if *cursor > streamed_chunks {
                continue;
            }
            let accepted = match self.streaming_sessions.get_mut(client_id) {
                Some(mut streaming) => streaming.consume_chunk(chunk),
                None => true,
            };
            if accepted {
                *cursor += 1;
            } else {
                all_accepted = false;
            }
        }

        if all_accepted {
            let mut inner = self.inner.lock();
            inner.streamed_chunks += 1;
            inner.streamed_frames += chunk.frames();
        }

        all_accepted
    }

    // ── State machine plumbing ────────────────────────────────────────

    fn process_event(&self, event: Event, now: Instant) -> bool {
        let current = self.state();
        let Some(row) = TRANSITIONS.iter().find(|r| r.event == event && r.from == current) else {
            return false;
        };

        let mut inner = self.inner.lock();
        if !(row.guard)(self, &inner, now) {
            return false;
        }

        let from = inner.state;
        inner.state = row.to;
        (row.action)(self, &mut inner, now);
        drop(inner);

        if from != row.to {
            self.events.emit_state(StateEvent::Transitioned {
                from,
                to: row.to,
                timestamp: now_millis(),
            });
        }
        true
    }

    fn is_ready_to_buffer(&self, inner: &StreamerInner, now: Instant) -> bool {
        let preparing_started_at = inner.preparing_started_at.unwrap_or(now);
        let timeout_reached = now.duration_since(preparing_started_at) > Duration::from_millis(READY_TO_BUFFER_TIMEOUT_MS);
        let not_ready = self.command_sessions.iter().filter(|s| !s.is_ready_to_buffer()).count();

        if timeout_reached {
            if not_ready > 0 {
                log::warn!("could not defer chunk processing due to reached threshold");
            }
            true
        } else {
            not_ready == 0
        }
    }

    fn is_ready_to_play(&self, inner: &StreamerInner, _now: Instant) -> bool {
        let streaming_duration = frames_to_duration(inner.streamed_frames, inner.sampling_rate);
        if streaming_duration > Duration::from_millis(READY_TO_PLAY_MIN_STREAMING_MS) {
            self.command_sessions.iter().all(|s| s.is_ready_to_play())
        } else {
            false
        }
    }

    fn is_not_draining(&self, _inner: &StreamerInner, _now: Instant) -> bool {
        !self.command_sessions.iter().any(|s| s.is_draining())
    }

    fn state_change_to_preparing(&self, inner: &mut StreamerInner, now: Instant) {
        inner.preparing_started_at = Some(now);
        inner.streamed_frames = 0;
        inner.buffered_frames = 0;
        inner.streamed_chunks = 0;

        for mut cursor in self.cursors.iter_mut() {
            *cursor = 0;
        }

        let sampling_rate = inner.sampling_rate;
        let format = self.encoder_builder.build(sampling_rate).format();
        for mut session in self.command_sessions.iter_mut() {
            let client_id = session.client_id().to_string();
            let params = StrmStartParams {
                bits_per_sample: format.bits_per_sample,
                sampling_rate,
                channels: crate::protocol_constants::DEFAULT_CHANNELS as u8,
                big_endian: format.endianness == crate::encoder::Endianness::Big,
                output_threshold_ms: 200,
                spdif_enable: false,
                transition_period_s: 0,
                transition_type: 0,
                replay_gain: 0,
                server_port: self.streaming_port,
                server_timestamp: 0,
                path: &format!("/stream?player={client_id}"),
            };
            session.prepare(&params);
        }

        log::debug!("preparing to stream started (rate={sampling_rate})");
    }

    fn state_change_to_buffering(&self, inner: &mut StreamerInner, now: Instant) {
        inner.buffering_started_at = Some(now);
        for mut session in self.command_sessions.iter_mut() {
            session.mark_buffering();
        }
        log::debug!("stream buffering started");
    }

    fn state_change_to_playing(&self, inner: &mut StreamerInner, now: Instant) {
        let playback_delay = self.calculate_playback_delay();
        inner.buffered_frames = inner.streamed_frames + duration_to_frames(playback_delay, inner.sampling_rate);

        let buffering_duration = frames_to_duration(inner.buffered_frames, inner.sampling_rate);
        let playback_started_at = inner.buffering_started_at.unwrap_or(now) + buffering_duration;
        inner.playback_started_at = Some(playback_started_at);

        let delay_ms = playback_started_at.saturating_duration_since(now).as_millis() as u32;
        for mut session in self.command_sessions.iter_mut() {
            session.unpause_at(delay_ms);
        }

        log::debug!("playback started (delay={}ms)", playback_delay.as_millis());
    }

    fn state_change_to_draining(&self, _inner: &mut StreamerInner, _now: Instant) {
        for mut session in self.command_sessions.iter_mut() {
            session.begin_draining();
        }
        log::debug!("stream draining started");
    }

    fn state_change_to_stopped(&self, _inner: &mut StreamerInner, _now: Instant) {
        for mut session in self.command_sessions.iter_mut() {
            session.stop();
        }
    }

    fn calculate_playback_delay(&self) -> Duration {
        let mut total = Duration::from_micros(PLAYBACK_DELAY_SLACK_US);
        for session in self.command_sessions.iter() {
            if let Some(latency_us) = session.latency_us() {
                total += Duration::from_micros(latency_us.max(0) as u64);
            }
        }
        total
    }
}

fn duration_to_frames(duration: Duration, sampling_rate: u32) -> u64 {
    if sampling_rate == 0 {
        return 0;
    }
    (duration.as_micros() as u64 * sampling_rate as u64) / 1_000_000
}

fn frames_to_duration(frames: u64, sampling_rate: u32) -> Duration {
    if sampling_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(frames * 1_000_000 / sampling_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncoderBuilder, Endianness};
    use crate::events::NoopEventEmitter;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn streamer() -> Streamer {
        Streamer::new(9000, EncoderBuilder::pcm(2, 16, Endianness::Little), Arc::new(NoopEventEmitter))
    }

    fn chunk(rate: u32, frames: u64) -> Chunk {
        Chunk::data(rate, 2, frames, Bytes::from(vec![0u8; frames as usize * 2 * 4]), Instant::now())
    }

    #[test]
    fn starting_a_stopped_streamer_transitions_to_started() {
        let streamer = streamer();
        streamer.start(Instant::now());
        assert_eq!(streamer.state(), StreamerState::Started);
    }

    #[test]
    fn consume_chunk_without_sessions_passes_straight_through_to_buffering() {
        let streamer = streamer();
        streamer.start(Instant::now());
        let now = Instant::now();

        // First chunk triggers Started -> Preparing and is deferred for retry.
        let mut c = chunk(48_000, 32);
        assert!(!streamer.consume_chunk(&mut c, now));
        assert_eq!(streamer.state(), StreamerState::Preparing);

        // With no command sessions, isReadyToBuffer is vacuously true: the
        // same chunk now buffers through to Buffering and is streamed. It
        // stays in Buffering until enough streaming duration has accrued for
        // isReadyToPlay's own minimum-streaming-time guard to pass.
        assert!(streamer.consume_chunk(&mut c, now));
        assert_eq!(streamer.state(), StreamerState::Buffering);
    }

    #[test]
    fn stop_transitions_back_to_stopped_and_invokes_callback() {
        let streamer = streamer();
        streamer.start(Instant::now());
        let mut called = false;
        streamer.stop(Instant::now(), || called = true);
        assert_eq!(streamer.state(), StreamerState::Stopped);
        assert!(called);
    }

    #[test]
    fn attaching_a_streaming_session_for_an_unknown_client_id_is_rejected() {
        let streamer = streamer();
        let (client, _server) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let connect = tokio::net::TcpStream::connect(addr);
                let (accepted, _) = tokio::join!(listener.accept(), connect);
                accepted.unwrap()
            });
        let (_, write_half) = client.into_split();
        let result = streamer.attach_streaming_session("unknown".to_string(), write_half);
        assert!(matches!(result, Err(ProtocolError::UnknownClientId(_))));
    }

    #[test]
    fn registering_and_removing_a_command_session_updates_the_registry() {
        let streamer = streamer();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = streamer.register_command_session(tx);
        assert!(streamer.with_command_session(&id, |_| ()).is_some());
        streamer.remove_command_session(&id);
        assert!(streamer.with_command_session(&id, |_| ()).is_none());
    }
}
