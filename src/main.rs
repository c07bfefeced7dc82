use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use a3s_pubsub::config::Config;
use a3s_pubsub::{grpc, logging, Broker, EventBus};

#[derive(Parser)]
#[command(name = "a3s-pubsub", version, about = "Publish/subscribe broker with gRPC streaming delivery")]
struct Cli {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "A3S_PUBSUB_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli);

    if let Err(e) = logging::init(&config.log) {
        eprintln!("[a3s-pubsub] {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        tracing::error!(error = %format!("{e:#}"), "Server failed");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load_or_default(cli.config.as_deref());
    if let Some(host) = &cli.host {
        apply_override(&mut config, |c| c.server.host = host.clone());
    }
    if let Some(port) = cli.port {
        apply_override(&mut config, |c| c.server.port = port);
    }
    if let Some(level) = &cli.log_level {
        apply_override(&mut config, |c| c.log.level = level.clone());
    }
    config
}

fn apply_override(config: &mut Config, change: impl FnOnce(&mut Config)) {
    if let Err(e) = config.apply_override(change) {
        eprintln!("[a3s-pubsub] Ignoring command-line override: {e}");
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let broker = Broker::new(config.pubsub.broker_config());
    let bus = EventBus::in_memory(broker.clone(), config.pubsub.message_buffer_size);
    broker.spawn_cleanup(config.pubsub.cleanup_interval());

    let listener = grpc::bind(&config.server)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;

    let stop_accepting = CancellationToken::new();
    let server = {
        let bus = bus.clone();
        let server_config = config.server.clone();
        let signal = stop_accepting.clone().cancelled_owned();
        tokio::spawn(async move { grpc::serve(listener, bus, &server_config, signal).await })
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let timeout = config.server.graceful_shutdown_timeout();
    let started = Instant::now();

    // Stop accepting first, then end open streams so connections can drain
    stop_accepting.cancel();
    if let Err(e) = bus.close(timeout).await {
        tracing::warn!(error = %e, "Event bus did not close cleanly");
    }

    let remaining = timeout.saturating_sub(started.elapsed());
    match tokio::time::timeout(remaining, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "gRPC server stopped with error"),
        Ok(Err(e)) => tracing::warn!(error = %e, "gRPC server task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "Graceful shutdown deadline exceeded, exiting"
        ),
    }

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
