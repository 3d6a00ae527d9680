//! SlimStreamer Server - standalone multi-room bit-perfect audio streaming
//! server speaking the SlimProto control protocol.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use slimstreamer_core::Bootstrapper;
use tokio::signal;

/// SlimStreamer - multi-room bit-perfect audio streaming server.
///
/// Version reporting is a hand-rolled `-v`/`--version` flag rather than
/// clap's built-in one, which only binds the long-form short `-V`.
#[derive(Parser, Debug)]
#[command(name = "slimstreamer")]
#[command(author, about, long_about = None, disable_version_flag = true)]
struct Args {
    /// Maximum number of simultaneously connected SlimProto clients.
    #[arg(short = 'c', long)]
    max_clients: Option<usize>,

    /// TCP port the SlimProto command session listener binds to.
    #[arg(short = 's', long)]
    slimproto_port: Option<u16>,

    /// TCP port the HTTP audio streaming listener binds to.
    #[arg(short = 't', long)]
    http_port: Option<u16>,

    /// Path to the configuration file (YAML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "SLIMSTREAMER_LOG_LEVEL")]
    log_level: Option<log::LevelFilter>,

    /// Print license information and exit.
    #[arg(short = 'l', long)]
    license: bool,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

const LICENSE_NOTICE: &str = concat!(
    "slimstreamer ",
    env!("CARGO_PKG_VERSION"),
    "\nLicensed under the GNU Affero General Public License v3.0 (AGPL-3.0).\n",
    "See https://www.gnu.org/licenses/agpl-3.0.html for the full text.",
);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("slimstreamer {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if args.license {
        println!("{LICENSE_NOTICE}");
        return Ok(());
    }

    let mut core_config = config::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(max_clients) = args.max_clients {
        core_config.max_clients = max_clients;
    }
    if let Some(slimproto_port) = args.slimproto_port {
        core_config.slimproto_port = slimproto_port;
    }
    if let Some(http_port) = args.http_port {
        core_config.http_port = http_port;
    }
    if let Some(log_level) = args.log_level {
        core_config.log_level = log_level.to_string();
    }

    let log_level: log::LevelFilter = core_config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    log::info!("SlimStreamer v{}", env!("CARGO_PKG_VERSION"));

    core_config
        .validate()
        .context("invalid configuration")?;

    log::info!(
        "configuration: slimproto_port={}, http_port={}, max_clients={}, capture_devices={:?}",
        core_config.slimproto_port,
        core_config.http_port,
        core_config.max_clients,
        core_config.capture_devices,
    );

    let services = Bootstrapper::bootstrap(&core_config).context("failed to bootstrap services")?;
    services.start_background_tasks();
    log::info!("services bootstrapped, listening for SlimProto and HTTP audio connections");

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up...");

    services.shutdown().await;
    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
