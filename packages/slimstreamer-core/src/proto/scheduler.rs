//! The dispatch loop: pumps capture pipelines into the Streamer and owns the
//! two network listeners (SlimProto command port, HTTP audio port).
//!
//! Everything here runs on one cooperative executor. Capture pipelines push
//! chunks from their own OS threads into ring buffers; this module is the
//! sole consumer of those buffers and the sole owner of every session
//! object, so no locking is needed around the session maps beyond what
//! `DashMap` already provides for the acceptor tasks racing against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::CapturePipeline;
use crate::protocol_constants::{LATENCY_PING_INTERVAL_MS, MAX_COMMAND_FRAME_SIZE};

use super::codec;
use super::streaming_session;
use super::Streamer;

/// Read buffer growth increment for a command connection.
const READ_CHUNK_SIZE: usize = 4096;

/// Owns the capture-pump loop and the two network acceptors.
pub struct Scheduler {
    streamer: Arc<Streamer>,
    pipelines: Vec<Arc<CapturePipeline>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(streamer: Arc<Streamer>, pipelines: Vec<Arc<CapturePipeline>>, cancel: CancellationToken) -> Self {
        Self {
            streamer,
            pipelines,
            cancel,
        }
    }

    /// Round-robins every capture pipeline into the Streamer until
    /// cancelled. Each pass visits every pipeline at most once, so one busy
    /// pipeline cannot starve the others.
    pub async fn run_capture_pump(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let mut all_idle = true;
            for pipeline in &self.pipelines {
                let streamer = Arc::clone(&self.streamer);
                let defer_ms = pipeline.produce_chunk(|chunk| {
                    let now = Instant::now();
                    streamer.consume_chunk(chunk, now)
                });

                match defer_ms {
                    None => {}
                    Some(0) => all_idle = false,
                    Some(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                }
            }

            if all_idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    /// Accepts SlimProto command connections until cancelled or `max_clients`
    /// is reached, spawning one reader/writer task pair per connection.
    pub async fn run_slimproto_listener(&self, addr: std::net::SocketAddr, max_clients: usize) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("SlimProto command listener bound to {addr}");
        let active_clients = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    if active_clients.load(Ordering::Acquire) >= max_clients {
                        log::warn!("rejecting command connection from {peer}: max_clients reached");
                        continue;
                    }
                    active_clients.fetch_add(1, Ordering::AcqRel);

                    let streamer = Arc::clone(&self.streamer);
                    let active_clients = Arc::clone(&active_clients);
                    let cancel = self.cancel.child_token();
                    tokio::spawn(async move {
                        handle_command_connection(streamer, stream, cancel).await;
                        active_clients.fetch_sub(1, Ordering::AcqRel);
                    });
                }
            }
        }
    }

    /// Accepts HTTP audio connections until cancelled, correlating each one
    /// with its command session by the `player=` query parameter.
    pub async fn run_http_listener(&self, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("HTTP audio listener bound to {addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let streamer = Arc::clone(&self.streamer);
                    tokio::spawn(async move {
                        if let Err(e) = handle_http_connection(streamer, stream).await {
                            log::warn!("HTTP audio connection from {peer} rejected: {e}");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_command_connection(streamer: Arc<Streamer>, stream: tokio::net::TcpStream, cancel: CancellationToken) {
    let peer = stream.peer_addr().ok();
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
    let client_id = streamer.register_command_session(out_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut read_chunk = [0u8; READ_CHUNK_SIZE];

    'read_loop: loop {
        tokio::select! {
            _ = cancel.cancelled() => break 'read_loop,
            result = read_half.read(&mut read_chunk) => {
                match result {
                    Ok(0) => break 'read_loop,
                    Ok(n) => {
                        if buf.len() + n > MAX_COMMAND_FRAME_SIZE * 2 {
                            log::warn!("client {client_id} exceeded frame buffer limit, closing");
                            break 'read_loop;
                        }
                        buf.extend_from_slice(&read_chunk[..n]);
                    }
                    Err(e) => {
                        log::debug!("client {client_id} read error: {e}");
                        break 'read_loop;
                    }
                }
            }
        }

        loop {
            match codec::decode_inbound(&mut buf) {
                Ok(Some(command)) => {
                    let now = Instant::now();
                    let handled = streamer.with_command_session(&client_id, |session| {
                        session.handle_inbound(command, now)
                    });
                    if let Some(Err(e)) = handled {
                        log::warn!("client {client_id} protocol error: {e}");
                        break 'read_loop;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("client {client_id} ({peer:?}) sent a malformed frame: {e}");
                    break 'read_loop;
                }
            }
        }
    }

    writer.abort();
    streamer.detach_streaming_session(&client_id);
    streamer.remove_command_session(&client_id);
}

async fn handle_http_connection(streamer: Arc<Streamer>, mut stream: tokio::net::TcpStream) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(1024);
    let mut byte = [0u8; 1];

    // Read just the request line; headers and body (there is none for a GET
    // request) are irrelevant to this server.
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed before request line"));
        }
        buf.extend_from_slice(&byte);
        if buf.ends_with(b"\r\n") || buf.len() > 4096 {
            break;
        }
    }

    let request_line = String::from_utf8_lossy(&buf);
    let path = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request path"))?;

    let client_id = streaming_session::parse_client_id(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let (_read_half, write_half) = stream.into_split();
    streamer
        .attach_streaming_session(client_id, write_half)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Interval at which every command session is sent a STRM:t latency ping.
pub fn latency_ping_interval() -> Duration {
    Duration::from_millis(LATENCY_PING_INTERVAL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncoderBuilder, Endianness};
    use crate::events::NoopEventEmitter;

    #[tokio::test]
    async fn rejects_http_request_for_unknown_client_id() {
        let streamer = Arc::new(Streamer::new(9000, EncoderBuilder::pcm(2, 16, Endianness::Little), Arc::new(NoopEventEmitter)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_http_connection(streamer, stream).await
        });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /stream?player=999 HTTP/1.0\r\n\r\n").await.unwrap();

        let result = server.await.unwrap();
        assert!(result.is_err());
    }
}
