//! Per-client HTTP audio connection.
//!
//! Unlike a typical HTTP streaming handler, a [`StreamingSession`] is not
//! driven by a pull loop reading from a channel: it is pushed bytes
//! synchronously by the scheduler, one chunk at a time, as the Streamer fans
//! a chunk out to every attached client. A non-blocking write that would
//! block reports the session as not-ready, so the Streamer can leave the
//! chunk at the head of that pipeline's buffer and retry the whole fan-out
//! shortly, instead of letting one slow client stall every other one.

use std::io::{self, ErrorKind};

use bytes::{Buf, Bytes};
use tokio::net::tcp::OwnedWriteHalf;

use crate::chunk::Chunk;
use crate::encoder::Encoder;
use crate::error::ProtocolError;

/// Parses the `player=<clientID>` query parameter out of an HTTP request
/// line's path, e.g. `/stream?player=ab:cd:ef`.
pub fn parse_client_id(path_and_query: &str) -> Result<String, ProtocolError> {
    let query = path_and_query.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("player="))
        .map(|id| id.to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ProtocolError::MissingClientId)
}

/// A client's open HTTP audio connection.
pub struct StreamingSession {
    client_id: String,
    encoder: Box<dyn Encoder>,
    write_half: OwnedWriteHalf,
    handshake_sent: bool,
    bytes_written: u64,
    /// Bytes of the in-flight chunk not yet accepted by the socket. A chunk
    /// that blocks partway through is never re-encoded on retry: the
    /// Streamer re-offers the identical chunk, so resuming from `pending`
    /// (instead of encoding again and writing from the start) is what keeps
    /// a stalled client from receiving duplicated audio once it drains.
    pending: Option<Bytes>,
}

impl StreamingSession {
    pub fn new(client_id: String, encoder: Box<dyn Encoder>, write_half: OwnedWriteHalf) -> Self {
        Self {
            client_id,
            encoder,
            write_half,
            handshake_sent: false,
            bytes_written: 0,
            pending: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Writes the `HTTP/1.0 200 OK` response header. Must be called once,
    /// before the first `consume_chunk`.
    pub fn send_handshake(&mut self) -> io::Result<()> {
        let header: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: audio/x-pcm\r\nConnection: close\r\n\r\n";
        self.try_write_some(Bytes::from_static(header))
            .map_err(|(_, e)| e)?;
        self.handshake_sent = true;
        Ok(())
    }

    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }

    /// Attempts a non-blocking write of `chunk`'s encoded bytes (or of
    /// whatever is left over from a previous blocked attempt). Returns `true`
    /// if everything was accepted, `false` if the socket would block partway
    /// through (the caller should retry this same chunk later; the unsent
    /// remainder is retained internally).
    ///
    /// A closed connection is reported as accepted: there is nothing useful
    /// left to retry, and the caller discovers the close via a subsequent
    /// read on the command session instead.
    pub fn consume_chunk(&mut self, chunk: &mut Chunk) -> bool {
        let buf = match self.pending.take() {
            Some(leftover) => leftover,
            None => {
                let encoded = self.encoder.encode(chunk);
                if encoded.is_empty() {
                    return true;
                }
                encoded
            }
        };

        match self.try_write_some(buf) {
            Ok(written) => {
                self.bytes_written += written as u64;
                true
            }
            Err((remaining, e)) if e.kind() == ErrorKind::WouldBlock => {
                self.pending = Some(remaining);
                false
            }
            Err(_) => true,
        }
    }

    /// Writes as much of `buf` as the socket currently accepts. On success,
    /// the whole buffer was written. On `WouldBlock`, the unwritten
    /// remainder is returned alongside the error so the caller can stash it.
    fn try_write_some(&mut self, mut buf: Bytes) -> Result<usize, (Bytes, io::Error)> {
        let total = buf.len();
        while !buf.is_empty() {
            match self.write_half.try_write(&buf) {
                Ok(0) => return Err((buf, io::Error::new(ErrorKind::WriteZero, "peer closed"))),
                Ok(n) => buf.advance(n),
                Err(e) => return Err((buf, e)),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_id_from_query_string() {
        assert_eq!(parse_client_id("/stream?player=ab:cd:ef").unwrap(), "ab:cd:ef");
    }

    #[test]
    fn parses_client_id_among_other_params() {
        assert_eq!(
            parse_client_id("/stream?format=pcm&player=42&rate=44100").unwrap(),
            "42"
        );
    }

    #[test]
    fn missing_client_id_is_an_error() {
        assert!(matches!(
            parse_client_id("/stream?format=pcm"),
            Err(ProtocolError::MissingClientId)
        ));
    }
}
