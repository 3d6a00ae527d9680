//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! event bridge, capture pipelines, Streamer and scheduler are instantiated
//! and wired together, in explicit dependency order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::capture::{AlsaSource, CapturePipeline};
use crate::config::Config;
use crate::encoder::{EncoderBuilder, Endianness};
use crate::error::SlimStreamerResult;
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::protocol_constants::{DEFAULT_CHANNELS, LATENCY_PING_INTERVAL_MS};
use crate::proto::{Scheduler, Streamer};
use crate::runtime::TokioSpawner;

/// Broadcast channel capacity for the domain event bridge. Generous enough
/// that a slow WebSocket-style subscriber (if one is ever attached) doesn't
/// force event loss under normal operation.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Container for all bootstrapped services, returned by [`Bootstrapper::bootstrap`].
pub struct BootstrappedServices {
    /// The global playback coordinator.
    pub streamer: Arc<Streamer>,
    /// The dispatch loop driving capture pipelines and network listeners.
    pub scheduler: Arc<Scheduler>,
    /// Bridges domain events onto a broadcast channel for any observer.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Cancellation token shared by every background task spawned here.
    pub cancel_token: CancellationToken,
    /// Task spawner for background maintenance (latency pings).
    pub spawner: TokioSpawner,
    slimproto_addr: SocketAddr,
    http_addr: SocketAddr,
    max_clients: usize,
}

impl BootstrappedServices {
    /// Spawns the capture pump, both network listeners, and the latency-ping
    /// sweep as background tasks, returning immediately.
    pub fn start_background_tasks(&self) {
        let scheduler = Arc::clone(&self.scheduler);
        self.spawner.spawn(async move {
            scheduler.run_capture_pump().await;
        });

        let scheduler = Arc::clone(&self.scheduler);
        let slimproto_addr = self.slimproto_addr;
        let max_clients = self.max_clients;
        self.spawner.spawn(async move {
            if let Err(e) = scheduler.run_slimproto_listener(slimproto_addr, max_clients).await {
                log::error!("SlimProto listener failed: {e}");
            }
        });

        let scheduler = Arc::clone(&self.scheduler);
        let http_addr = self.http_addr;
        self.spawner.spawn(async move {
            if let Err(e) = scheduler.run_http_listener(http_addr).await {
                log::error!("HTTP audio listener failed: {e}");
            }
        });

        let streamer = Arc::clone(&self.streamer);
        let cancel = self.cancel_token.clone();
        self.spawner.spawn(async move {
            let mut ping_timestamp: u32 = 0;
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(LATENCY_PING_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        streamer.ping_all_sessions(ping_timestamp, std::time::Instant::now());
                        ping_timestamp = ping_timestamp.wrapping_add(1);
                    }
                }
            }
        });

        let now = std::time::Instant::now();
        self.streamer.start(now);
    }

    /// Initiates graceful shutdown: cancels every background task and stops
    /// the Streamer, which in turn commands every connected client to stop.
    pub async fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.streamer.stop(std::time::Instant::now(), move || {
            let _ = tx.send(());
        });
        let _ = rx.await;

        log::info!("shutdown complete");
    }
}

/// Wires up the streaming core from a validated [`Config`].
pub struct Bootstrapper;

impl Bootstrapper {
    /// Bootstraps all services: capture pipelines for every configured
    /// device, the Streamer, and the scheduler that ties them to the
    /// network.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn bootstrap(config: &Config) -> SlimStreamerResult<BootstrappedServices> {
        config.validate()?;

        let spawner = TokioSpawner::current();
        let cancel_token = CancellationToken::new();

        let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
        let events: Arc<dyn EventEmitter> = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

        let pipelines: Vec<Arc<CapturePipeline>> = config
            .capture_devices
            .iter()
            .map(|(&sampling_rate, device)| {
                let source = AlsaSource::new(device.clone(), sampling_rate, DEFAULT_CHANNELS);
                Arc::new(CapturePipeline::start(
                    source,
                    config.ring_buffer_capacity,
                    Arc::clone(&events),
                ))
            })
            .collect();

        // 16-bit PCM is the widest format every SlimProto client is
        // guaranteed to accept without a capabilities negotiation this
        // server doesn't implement.
        let encoder_builder = EncoderBuilder::pcm(DEFAULT_CHANNELS, 16, Endianness::Big);
        let streamer = Arc::new(Streamer::new(config.http_port, encoder_builder, Arc::clone(&events)));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&streamer),
            pipelines,
            cancel_token.clone(),
        ));

        Ok(BootstrappedServices {
            streamer,
            scheduler,
            event_bridge,
            cancel_token,
            spawner,
            slimproto_addr: SocketAddr::from(([0, 0, 0, 0], config.slimproto_port)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], config.http_port)),
            max_clients: config.max_clients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.max_clients = 0;
        assert!(Bootstrapper::bootstrap(&config).is_err());
    }
}
