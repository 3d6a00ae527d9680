//! SlimProto wire codec.
//!
//! Inbound frames (client -> server) are `[opcode: 4 bytes][length: u32 BE]
//! [body: length bytes]`, where `length` counts only the body. Outbound
//! frames (server -> client) use the protocol's historical asymmetric
//! framing: `[length: u16 BE][opcode: 4 bytes][body]`, where `length` counts
//! the opcode plus the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol_constants::*;

/// A fully parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    Helo(HeloCommand),
    Stat(StatCommand),
    Dsco { reason: u8 },
    Resp { headers: Vec<u8> },
    Setd { id: u8 },
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeloCommand {
    pub device_id: u8,
    pub revision: u8,
    pub mac: [u8; 6],
    pub capabilities: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatCommand {
    pub event: [u8; 4],
    pub buffer_fullness: u32,
    pub decoder_fullness: u32,
    pub bytes_received: u64,
    pub elapsed_milliseconds: u32,
    pub output_buffer_size: u32,
    pub output_buffer_fullness: u32,
    /// Echoes the `server_timestamp` of the most recent STRM:t ping, for
    /// round-trip latency measurement.
    pub server_timestamp: u32,
}

/// Attempts to decode one complete inbound frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a full frame; the caller
/// should read more bytes from the socket and try again. On success, the
/// consumed bytes are removed from `buf`.
pub fn decode_inbound(buf: &mut BytesMut) -> Result<Option<InboundCommand>, ProtocolError> {
    if buf.len() < 8 {
        return Ok(None);
    }
    let opcode: [u8; 4] = buf[0..4].try_into().expect("checked length above");
    let body_len = u32::from_be_bytes(buf[4..8].try_into().expect("checked length above")) as usize;
    if body_len > MAX_COMMAND_FRAME_SIZE {
        return Err(ProtocolError::Truncated {
            expected: body_len,
            actual: MAX_COMMAND_FRAME_SIZE,
        });
    }
    if buf.len() < 8 + body_len {
        return Ok(None);
    }

    let mut frame = buf.split_to(8 + body_len);
    frame.advance(8);
    let mut body = frame;

    let command = match &opcode {
        o if o == OPCODE_HELO => InboundCommand::Helo(decode_helo(&mut body)?),
        o if o == OPCODE_STAT => InboundCommand::Stat(decode_stat(&mut body)?),
        o if o == OPCODE_DSCO => {
            if body.is_empty() {
                return Err(ProtocolError::Truncated { expected: 1, actual: 0 });
            }
            InboundCommand::Dsco { reason: body.get_u8() }
        }
        o if o == OPCODE_RESP => InboundCommand::Resp { headers: body.to_vec() },
        o if o == OPCODE_SETD => {
            if body.is_empty() {
                return Err(ProtocolError::Truncated { expected: 1, actual: 0 });
            }
            InboundCommand::Setd { id: body.get_u8() }
        }
        o if o == OPCODE_BYE => InboundCommand::Bye,
        other => {
            return Err(ProtocolError::UnsupportedOpcode(
                String::from_utf8_lossy(other).to_string(),
            ))
        }
    };

    Ok(Some(command))
}

fn decode_helo(body: &mut BytesMut) -> Result<HeloCommand, ProtocolError> {
    if body.len() < 8 {
        return Err(ProtocolError::Truncated { expected: 8, actual: body.len() });
    }
    let device_id = body.get_u8();
    let revision = body.get_u8();
    let mut mac = [0u8; 6];
    body.copy_to_slice(&mut mac);
    let capabilities = String::from_utf8_lossy(&body.split_to(body.len())).to_string();
    Ok(HeloCommand { device_id, revision, mac, capabilities })
}

fn decode_stat(body: &mut BytesMut) -> Result<StatCommand, ProtocolError> {
    const STAT_BODY_LEN: usize = 4 + 4 + 4 + 8 + 4 + 4 + 4 + 4;
    if body.len() < STAT_BODY_LEN {
        return Err(ProtocolError::Truncated { expected: STAT_BODY_LEN, actual: body.len() });
    }
    let mut event = [0u8; 4];
    body.copy_to_slice(&mut event);
    Ok(StatCommand {
        event,
        buffer_fullness: body.get_u32(),
        decoder_fullness: body.get_u32(),
        bytes_received: body.get_u64(),
        elapsed_milliseconds: body.get_u32(),
        output_buffer_size: body.get_u32(),
        output_buffer_fullness: body.get_u32(),
        server_timestamp: body.get_u32(),
    })
}

fn write_outbound_frame(opcode: &[u8; 4], body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + 4 + body.len());
    out.put_u16((4 + body.len()) as u16);
    out.put_slice(opcode);
    out.put_slice(body);
    out.freeze()
}

/// Fields a STRM:start command conveys to the client: format, PCM layout,
/// buffering thresholds and the HTTP path to fetch the stream from.
pub struct StrmStartParams<'a> {
    pub bits_per_sample: u16,
    pub sampling_rate: u32,
    pub channels: u8,
    pub big_endian: bool,
    pub output_threshold_ms: u16,
    pub spdif_enable: bool,
    pub transition_period_s: u8,
    pub transition_type: u8,
    pub replay_gain: u32,
    pub server_port: u16,
    pub server_timestamp: u32,
    pub path: &'a str,
}

pub fn encode_strm_start(params: &StrmStartParams) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(STRM_START);
    body.put_u8(b'p'); // format: PCM is the only format this server produces
    body.put_u8(sample_size_code(params.bits_per_sample));
    body.put_u8(params.channels);
    body.put_u8(u8::from(!params.big_endian));
    body.put_u16(params.output_threshold_ms);
    body.put_u8(u8::from(params.spdif_enable));
    body.put_u8(params.transition_period_s);
    body.put_u8(params.transition_type);
    body.put_u32(params.replay_gain);
    body.put_u32(params.sampling_rate);
    body.put_u16(params.server_port);
    body.put_u32(params.server_timestamp);
    body.put_slice(params.path.as_bytes());
    write_outbound_frame(OPCODE_STRM, &body)
}

fn sample_size_code(bits_per_sample: u16) -> u8 {
    match bits_per_sample {
        16 => 1,
        24 => 2,
        32 => 3,
        other => panic!("unsupported PCM bit depth: {other}"),
    }
}

fn encode_strm_simple(sub_command: u8) -> Bytes {
    write_outbound_frame(OPCODE_STRM, &[sub_command])
}

pub fn encode_strm_stop() -> Bytes {
    encode_strm_simple(STRM_STOP)
}

pub fn encode_strm_flush() -> Bytes {
    encode_strm_simple(STRM_FLUSH)
}

/// STRM:t, a latency ping: the client echoes `server_timestamp` back in its
/// next STAT frame.
pub fn encode_strm_status(server_timestamp: u32) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(STRM_STATUS);
    body.put_u32(server_timestamp);
    write_outbound_frame(OPCODE_STRM, &body)
}

/// STRM:u, resume playback at `target_timestamp` (server clock, matching the
/// computed playback start time).
pub fn encode_strm_unpause(target_timestamp: u32) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(STRM_UNPAUSE);
    body.put_u32(target_timestamp);
    write_outbound_frame(OPCODE_STRM, &body)
}

pub fn encode_strm_pause() -> Bytes {
    encode_strm_simple(STRM_PAUSE)
}

pub fn encode_aude(dac_enable: bool, spdif_enable: bool) -> Bytes {
    let body = [u8::from(dac_enable), u8::from(spdif_enable)];
    write_outbound_frame(OPCODE_AUDE, &body)
}

/// AUDG: audio gain. Wire layout matches existing Squeezebox clients byte
/// for byte: the two current 32-bit gain values, followed by the two 16-bit
/// legacy gain values older firmware still expects, followed by an optional
/// sequence number used to discard stale gain updates.
pub fn encode_audg(
    gain_left: u32,
    gain_right: u32,
    legacy_gain_left: u16,
    legacy_gain_right: u16,
    sequence: Option<u32>,
) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u32(gain_left);
    body.put_u32(gain_right);
    body.put_u16(legacy_gain_left);
    body.put_u16(legacy_gain_right);
    if let Some(seq) = sequence {
        body.put_u32(seq);
    }
    write_outbound_frame(OPCODE_AUDG, &body)
}

/// SETD: device setting request/selection. `id` selects which setting is
/// being requested or applied (e.g. request device name, select squeezebox3
/// device type); see `protocol_constants::SETD_ID_*`.
pub fn encode_setd(id: u8) -> Bytes {
    write_outbound_frame(OPCODE_SETD, &[id])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_returns_none_on_partial_header() {
        let mut buf = BytesMut::from(&b"HELO"[..]);
        assert_eq!(decode_inbound(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_returns_none_until_full_body_arrives() {
        let mut buf = BytesMut::new();
        buf.put_slice(OPCODE_DSCO);
        buf.put_u32(1);
        assert_eq!(decode_inbound(&mut buf).unwrap(), None);
        buf.put_u8(3);
        let command = decode_inbound(&mut buf).unwrap().unwrap();
        assert_eq!(command, InboundCommand::Dsco { reason: 3 });
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_helo_reads_mac_and_capabilities() {
        let mut buf = BytesMut::new();
        buf.put_slice(OPCODE_HELO);
        let mut body = BytesMut::new();
        body.put_u8(8); // device_id
        body.put_u8(2); // revision
        body.put_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        body.put_slice(b"pcm,flc");
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);

        let command = decode_inbound(&mut buf).unwrap().unwrap();
        assert_eq!(
            command,
            InboundCommand::Helo(HeloCommand {
                device_id: 8,
                revision: 2,
                mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
                capabilities: "pcm,flc".to_string(),
            })
        );
    }

    #[test]
    fn unsupported_opcode_is_reported() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"XXXX");
        buf.put_u32(0);
        assert!(matches!(
            decode_inbound(&mut buf),
            Err(ProtocolError::UnsupportedOpcode(_))
        ));
    }

    #[test]
    fn outbound_strm_start_uses_two_byte_length_prefix() {
        let bytes = encode_strm_start(&StrmStartParams {
            bits_per_sample: 16,
            sampling_rate: 44_100,
            channels: 2,
            big_endian: false,
            output_threshold_ms: 200,
            spdif_enable: false,
            transition_period_s: 0,
            transition_type: 0,
            replay_gain: 0,
            server_port: 9000,
            server_timestamp: 0,
            path: "/stream?player=abc",
        });
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        assert_eq!(len, bytes.len() - 2);
        assert_eq!(&bytes[2..6], OPCODE_STRM);
        assert_eq!(bytes[6], STRM_START);
    }

    #[test]
    fn outbound_strm_stop_is_a_single_sub_command_byte() {
        let bytes = encode_strm_stop();
        assert_eq!(bytes.len(), 2 + 4 + 1);
        assert_eq!(bytes[bytes.len() - 1], STRM_STOP);
    }
}
