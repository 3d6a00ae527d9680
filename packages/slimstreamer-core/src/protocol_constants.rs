//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the SlimProto wire format and the Streamer's
//! state machine timing rules; changing them would break compatibility with
//! real SqueezeLite/Squeezebox clients.

// ─────────────────────────────────────────────────────────────────────────────
// SlimProto opcodes
// ─────────────────────────────────────────────────────────────────────────────

/// Client handshake, sent once as the first frame on a new command session.
pub const OPCODE_HELO: &[u8; 4] = b"HELO";
/// Periodic client status report (buffer fullness, elapsed time, STMt ack).
pub const OPCODE_STAT: &[u8; 4] = b"STAT";
/// Client disconnected its HTTP audio stream.
pub const OPCODE_DSCO: &[u8; 4] = b"DSCO";
/// Client's raw HTTP response headers, forwarded for inspection.
pub const OPCODE_RESP: &[u8; 4] = b"RESP";
/// Client display/name setting report.
pub const OPCODE_SETD: &[u8; 4] = b"SETD";
/// Client is shutting down its command connection.
pub const OPCODE_BYE: &[u8; 4] = b"BYE!";

/// Server stream-control command (start/stop/pause/unpause/flush/time).
pub const OPCODE_STRM: &[u8; 4] = b"strm";
/// Server audio-enable command.
pub const OPCODE_AUDE: &[u8; 4] = b"aude";
/// Server audio-gain command.
pub const OPCODE_AUDG: &[u8; 4] = b"audg";

// ─────────────────────────────────────────────────────────────────────────────
// STRM sub-commands (the single byte following the strm opcode/size header)
// ─────────────────────────────────────────────────────────────────────────────

pub const STRM_START: u8 = b's';
pub const STRM_STOP: u8 = b'q';
pub const STRM_PAUSE: u8 = b'p';
pub const STRM_UNPAUSE: u8 = b'u';
pub const STRM_FLUSH: u8 = b'f';
pub const STRM_STATUS: u8 = b't';

/// Outbound SETD `id` values this server sends during HELO handshaking.
pub const SETD_ID_REQUEST_NAME: u8 = 0;
pub const SETD_ID_SQUEEZEBOX3: u8 = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Streamer state machine timing
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum time to wait for every command session to report buffering
/// readiness before forcing the transition to Buffering anyway (ms).
pub const READY_TO_BUFFER_TIMEOUT_MS: u64 = 2000;

/// Minimum time a stream must have been buffering before it is allowed to
/// start playing, even if every session already reports ready (ms).
pub const READY_TO_PLAY_MIN_STREAMING_MS: u64 = 2000;

/// Fixed slack added to the computed playback delay so that every client's
/// local buffer has drained below its start threshold before playback
/// begins, regardless of how many sessions are attached (microseconds).
pub const PLAYBACK_DELAY_SLACK_US: u64 = 1000;

/// Interval between STRM:t latency pings sent to each command session (ms).
pub const LATENCY_PING_INTERVAL_MS: u64 = 5000;

/// Minimum number of latency samples collected before the rolling average is
/// considered stable enough to use in playback delay calculations.
pub const LATENCY_ROLLING_WINDOW_MIN_SAMPLES: usize = 5;

/// Output-buffer fullness (bytes) a client must report before its STAT
/// readiness flags (ready-to-buffer, ready-to-play) are allowed to flip.
pub const OUTPUT_BUFFER_FULLNESS_THRESHOLD: u32 = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Capture / buffering
// ─────────────────────────────────────────────────────────────────────────────

/// Number of buffered chunks a capture pipeline must accumulate before the
/// Streamer is willing to start consuming from it.
pub const CAPTURE_START_THRESHOLD_CHUNKS: usize = 5;

/// Default audio sample rate (Hz) used when a client requests the server's
/// default rather than one of the explicitly configured capture devices.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default number of audio channels (stereo). The capture device itself is
/// opened with one additional channel carrying the per-frame command byte.
pub const DEFAULT_CHANNELS: u16 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Networking
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum size of a single SlimProto command frame body (bytes). Guards
/// against a misbehaving client claiming an implausible length prefix.
pub const MAX_COMMAND_FRAME_SIZE: usize = 64 * 1024;
