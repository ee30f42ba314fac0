//! Prometheus exporter for AWS resource state not exposed by CloudWatch.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aws_inventory_exporter::{
    AwsClients, ExporterConfig, HttpServer, MetricRegistry, Refresher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Invalid environment values abort here, before anything binds.
    let config = ExporterConfig::from_env()?;

    info!(
        region = %config.region,
        interval_secs = config.refresh_interval.as_secs(),
        port = config.listen_port,
        "starting AWS inventory exporter"
    );

    let registry = Arc::new(MetricRegistry::for_exporter());
    let clients = AwsClients::connect(&config.region).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The refresher is the registry's only writer; the first cycle fires
    // immediately so data is available before the first scrape.
    let refresher = Refresher::new(
        clients.clone(),
        clients,
        registry.clone(),
        config.refresh_interval,
    );
    let refresh_task = tokio::spawn(refresher.run());

    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Bind failure propagates out of run() and aborts the process.
    let http_server = HttpServer::new(registry, config.listen_addr());
    http_server.run(shutdown_rx).await?;

    // No graceful drain of an in-flight refresh; the cycle is abandoned.
    refresh_task.abort();
    signal_task.abort();

    info!("exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM");
        }
    }
}
