mod cli;
mod config;
mod kubernetes;
mod reconciler;
mod registry;
mod session;
mod sink;
mod stream;
#[cfg(test)]
mod testing;
mod throttle;
mod types;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use cli::Cli;
use config::Config;
use kubernetes::{KubeLogSource, initialize_client, watch_pods};
use reconciler::Reconciler;
use registry::Registry;
use sink::HttpSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let client = initialize_client().await?;
    let sink = Arc::new(HttpSink::new(config.remote_url.clone())?);
    let registry = Arc::new(Registry::new());
    let reconciler = Arc::new(Reconciler::new(
        config.namespace.clone(),
        config.container_filter.clone(),
        config.mode,
        registry.clone(),
        Arc::new(KubeLogSource::new(client.clone())),
        sink,
    ));

    info!(
        "Forwarding logs from namespace {} to {} (mode: {:?})",
        config.namespace, config.remote_url, config.mode
    );

    let namespace = config.namespace.clone();
    let selector = config.selector.clone();
    let mut watcher = tokio::spawn(async move {
        watch_pods(client, &namespace, selector.as_deref(), reconciler).await;
    });

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown requested"),
        res = &mut watcher => warn!("Pod watcher exited: {:?}", res),
    }

    watcher.abort();
    let live = registry.len().await;
    registry.shutdown().await;
    info!("Stopped {} log sessions", live);
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
