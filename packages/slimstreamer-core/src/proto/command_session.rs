//! Per-client SlimProto command session.
//!
//! One [`CommandSession`] exists per connected client, driving its own state
//! machine from inbound HELO/STAT/DSCO/SETD/BYE! frames and writing outbound
//! STRM/AUDE/AUDG/SETD frames back. It correlates with the client's HTTP
//! audio connection (a [`super::streaming_session::StreamingSession`]) only
//! by `client_id`; the two never hold a direct reference to each other.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ProtocolError;
use crate::protocol_constants::{
    LATENCY_ROLLING_WINDOW_MIN_SAMPLES, OUTPUT_BUFFER_FULLNESS_THRESHOLD, SETD_ID_REQUEST_NAME,
    SETD_ID_SQUEEZEBOX3,
};

use super::codec::{
    self, HeloCommand, InboundCommand, StatCommand, StrmStartParams,
};

/// STAT event codes this server understands. Squeezebox clients report many
/// more; everything else is logged and otherwise ignored.
mod stat_event {
    /// Track loaded / streaming stable: combined with output-buffer fullness,
    /// this is what flips `isReadyToPlay`.
    pub const BUFFER_THRESHOLD: &[u8; 4] = b"STMl";
    /// Decode underrun expected / drain complete: clears `isDraining` once the
    /// server has asked the client to drain.
    pub const DECODER_READY: &[u8; 4] = b"STMd";
    /// Output underrun with no more data queued.
    pub const OUTPUT_UNDERRUN: &[u8; 4] = b"STMu";
    /// Acknowledges a STRM:t latency ping; `server_timestamp` is the echo.
    pub const TIMER_ACK: &[u8; 4] = b"STMt";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSessionState {
    Connected,
    Identified,
    Preparing,
    Buffering,
    Playing,
    Draining,
}

const LATENCY_WINDOW_CAPACITY: usize = 16;

/// A connected client's command session.
pub struct CommandSession {
    client_id: String,
    mac: Option<[u8; 6]>,
    capabilities: Option<String>,
    state: CommandSessionState,
    ready_to_buffer: bool,
    ready_to_play: bool,
    draining: bool,
    latency_samples_us: VecDeque<i64>,
    outstanding_ping: Option<(u32, Instant)>,
    out_tx: UnboundedSender<Bytes>,
}

impl CommandSession {
    pub fn new(client_id: String, out_tx: UnboundedSender<Bytes>) -> Self {
        Self {
            client_id,
            mac: None,
            capabilities: None,
            state: CommandSessionState::Connected,
            ready_to_buffer: false,
            ready_to_play: false,
            draining: false,
            latency_samples_us: VecDeque::with_capacity(LATENCY_WINDOW_CAPACITY),
            outstanding_ping: None,
            out_tx,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> CommandSessionState {
        self.state
    }

    pub fn is_ready_to_buffer(&self) -> bool {
        self.ready_to_buffer
    }

    pub fn is_ready_to_play(&self) -> bool {
        self.ready_to_play
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Arithmetic mean of the most recent latency samples, once at least
    /// [`LATENCY_ROLLING_WINDOW_MIN_SAMPLES`] have been collected.
    pub fn latency_us(&self) -> Option<i64> {
        if self.latency_samples_us.len() < LATENCY_ROLLING_WINDOW_MIN_SAMPLES {
            return None;
        }
        let sum: i64 = self.latency_samples_us.iter().sum();
        Some(sum / self.latency_samples_us.len() as i64)
    }

    /// Processes one inbound frame, updating session state and writing any
    /// outbound replies. Returns `true` once HELO has established identity
    /// (the caller uses this to know the session is ready to be paired with
    /// a capture pipeline).
    pub fn handle_inbound(&mut self, command: InboundCommand, now: Instant) -> Result<(), ProtocolError> {
        match command {
            InboundCommand::Helo(helo) => self.handle_helo(helo),
            InboundCommand::Stat(stat) => self.handle_stat(stat, now),
            InboundCommand::Dsco { reason } => {
                log::info!("client {} disconnected its audio stream (reason {reason})", self.client_id);
                Ok(())
            }
            InboundCommand::Resp { headers } => {
                log::debug!(
                    "client {} sent {} bytes of HTTP response headers",
                    self.client_id,
                    headers.len()
                );
                Ok(())
            }
            InboundCommand::Setd { id } => {
                log::debug!("client {} reported SETD id {id}", self.client_id);
                Ok(())
            }
            InboundCommand::Bye => {
                log::info!("client {} said goodbye", self.client_id);
                Ok(())
            }
        }
    }

    fn handle_helo(&mut self, helo: HeloCommand) -> Result<(), ProtocolError> {
        if self.state != CommandSessionState::Connected {
            return Err(ProtocolError::HeloNotFirst);
        }
        self.mac = Some(helo.mac);
        self.capabilities = Some(helo.capabilities);
        self.state = CommandSessionState::Identified;

        self.send(codec::encode_strm_stop());
        self.send(codec::encode_setd(SETD_ID_REQUEST_NAME));
        self.send(codec::encode_setd(SETD_ID_SQUEEZEBOX3));
        self.send(codec::encode_aude(true, true));
        self.send(codec::encode_audg(0, 0, 0, 0, None));
        Ok(())
    }

    fn handle_stat(&mut self, stat: StatCommand, now: Instant) -> Result<(), ProtocolError> {
        let fullness_ok = stat.output_buffer_fullness >= OUTPUT_BUFFER_FULLNESS_THRESHOLD;
        if fullness_ok {
            self.ready_to_buffer = true;
        }
        match &stat.event {
            e if e == stat_event::BUFFER_THRESHOLD && fullness_ok => self.ready_to_play = true,
            e if e == stat_event::DECODER_READY => {
                if self.draining {
                    self.draining = false;
                    self.send(codec::encode_strm_flush());
                }
            }
            e if e == stat_event::OUTPUT_UNDERRUN => {
                log::debug!("client {} reported output underrun", self.client_id);
            }
            e if e == stat_event::TIMER_ACK => self.record_ping_echo(stat.server_timestamp, now),
            _ => {}
        }
        Ok(())
    }

    /// Called by the Streamer when it sends this session into Draining
    /// (stream end or rate change): `isDraining` stays true until the client
    /// reports `STMd` (decode underrun expected / drain complete).
    pub fn begin_draining(&mut self) {
        self.state = CommandSessionState::Draining;
        self.draining = true;
    }

    /// `(now - sent) / 2`: the STRM:t round trip halved to a one-way latency
    /// estimate.
    fn record_ping_echo(&mut self, echoed_timestamp: u32, now: Instant) {
        let Some((sent_timestamp, sent_at)) = self.outstanding_ping.take() else {
            return;
        };
        if sent_timestamp != echoed_timestamp {
            return;
        }
        let one_way_us = now.duration_since(sent_at).as_micros() as i64 / 2;
        if self.latency_samples_us.len() == LATENCY_WINDOW_CAPACITY {
            self.latency_samples_us.pop_front();
        }
        self.latency_samples_us.push_back(one_way_us);
    }

    /// Sends a STRM:t latency ping, recording when it was sent so the
    /// matching STAT echo can be timed.
    pub fn send_ping(&mut self, server_timestamp: u32, now: Instant) {
        self.outstanding_ping = Some((server_timestamp, now));
        self.send(codec::encode_strm_status(server_timestamp));
    }

    /// Transitions to `Preparing` and instructs the client to start fetching
    /// its HTTP audio stream.
    pub fn prepare(&mut self, params: &StrmStartParams<'_>) {
        self.state = CommandSessionState::Preparing;
        self.ready_to_buffer = false;
        self.ready_to_play = false;
        self.draining = false;
        self.send(codec::encode_strm_start(params));
    }

    pub fn mark_buffering(&mut self) {
        self.state = CommandSessionState::Buffering;
    }

    /// Instructs the client to unpause at `target_timestamp` (server clock).
    pub fn unpause_at(&mut self, target_timestamp: u32) {
        self.state = CommandSessionState::Playing;
        self.send(codec::encode_strm_unpause(target_timestamp));
    }

    pub fn stop(&mut self) {
        self.state = CommandSessionState::Connected;
        self.send(codec::encode_strm_stop());
    }

    fn send(&self, frame: Bytes) {
        if self.out_tx.send(frame).is_err() {
            log::debug!("client {} command channel already closed", self.client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session() -> (CommandSession, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSession::new("1".to_string(), tx), rx)
    }

    #[test]
    fn helo_before_anything_else_is_accepted_and_identifies_the_client() {
        let (mut session, mut rx) = session();
        let helo = HeloCommand {
            device_id: 8,
            revision: 1,
            mac: [1, 2, 3, 4, 5, 6],
            capabilities: "pcm".to_string(),
        };
        session.handle_inbound(InboundCommand::Helo(helo), Instant::now()).unwrap();
        assert_eq!(session.state(), CommandSessionState::Identified);
        assert!(rx.try_recv().is_ok(), "HELO should trigger an outbound STRM:stop");
    }

    #[test]
    fn second_helo_is_rejected() {
        let (mut session, _rx) = session();
        let helo = HeloCommand {
            device_id: 8,
            revision: 1,
            mac: [0; 6],
            capabilities: String::new(),
        };
        session.handle_inbound(InboundCommand::Helo(helo.clone()), Instant::now()).unwrap();
        let err = session.handle_inbound(InboundCommand::Helo(helo), Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::HeloNotFirst));
    }

    #[test]
    fn latency_is_none_before_minimum_sample_count() {
        let (mut session, _rx) = session();
        for i in 0..LATENCY_ROLLING_WINDOW_MIN_SAMPLES - 1 {
            let now = Instant::now();
            session.send_ping(i as u32, now);
            session.handle_inbound(
                InboundCommand::Stat(StatCommand {
                    event: *stat_event::TIMER_ACK,
                    buffer_fullness: 0,
                    decoder_fullness: 0,
                    bytes_received: 0,
                    elapsed_milliseconds: 0,
                    output_buffer_size: 0,
                    output_buffer_fullness: 0,
                    server_timestamp: i as u32,
                }),
                now,
            ).unwrap();
        }
        assert_eq!(session.latency_us(), None);
    }

    #[test]
    fn latency_averages_once_minimum_sample_count_is_reached() {
        let (mut session, _rx) = session();
        for i in 0..LATENCY_ROLLING_WINDOW_MIN_SAMPLES {
            let now = Instant::now();
            session.send_ping(i as u32, now);
            session.handle_inbound(
                InboundCommand::Stat(StatCommand {
                    event: *stat_event::TIMER_ACK,
                    buffer_fullness: 0,
                    decoder_fullness: 0,
                    bytes_received: 0,
                    elapsed_milliseconds: 0,
                    output_buffer_size: 0,
                    output_buffer_fullness: 0,
                    server_timestamp: i as u32,
                }),
                now,
            ).unwrap();
        }
        assert!(session.latency_us().is_some());
    }

    fn stat(event: [u8; 4], output_buffer_fullness: u32, server_timestamp: u32) -> StatCommand {
        StatCommand {
            event,
            buffer_fullness: 0,
            decoder_fullness: 0,
            bytes_received: 0,
            elapsed_milliseconds: 0,
            output_buffer_size: 0,
            output_buffer_fullness,
            server_timestamp,
        }
    }

    #[test]
    fn any_stat_above_the_fullness_threshold_sets_ready_to_buffer() {
        let (mut session, _rx) = session();
        session.handle_inbound(
            InboundCommand::Stat(stat(*b"STMt", OUTPUT_BUFFER_FULLNESS_THRESHOLD, 0)),
            Instant::now(),
        ).unwrap();
        assert!(session.is_ready_to_buffer());
    }

    #[test]
    fn stat_below_the_fullness_threshold_does_not_set_ready_to_buffer() {
        let (mut session, _rx) = session();
        session.handle_inbound(
            InboundCommand::Stat(stat(*stat_event::BUFFER_THRESHOLD, 0, 0)),
            Instant::now(),
        ).unwrap();
        assert!(!session.is_ready_to_buffer());
        assert!(!session.is_ready_to_play());
    }

    #[test]
    fn stml_above_threshold_sets_ready_to_play() {
        let (mut session, _rx) = session();
        session.handle_inbound(
            InboundCommand::Stat(stat(*stat_event::BUFFER_THRESHOLD, OUTPUT_BUFFER_FULLNESS_THRESHOLD, 0)),
            Instant::now(),
        ).unwrap();
        assert!(session.is_ready_to_play());
    }

    #[test]
    fn draining_clears_and_sends_flush_once_the_client_reports_stmd() {
        let (mut session, mut rx) = session();
        session.begin_draining();
        assert!(session.is_draining());

        session.handle_inbound(
            InboundCommand::Stat(stat(*stat_event::DECODER_READY, 0, 0)),
            Instant::now(),
        ).unwrap();

        assert!(!session.is_draining());
        let flush = rx.try_recv().expect("STRM:flush should have been sent");
        assert_eq!(&flush[6..7], b"f");
    }
}
