// fake-service-rs/src/main.rs
// Fake service node entry point
//
// Reads configuration from the environment, provisions upstream clients and
// serves either HTTP or gRPC on LISTEN_ADDR until interrupted.

use std::sync::Arc;

use config_rs::{ServerType, ServiceConfig};
use error_handling_rs::ServiceError;
use fake_service::{grpc, http, parse_targets, Handler, UpstreamClients};
use telemetrist::Logger;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let config = ServiceConfig::from_env().map_err(ServiceError::config)?;

    telemetrist::init_logging(&config.logging, &config.name)
        .map_err(|e| ServiceError::Telemetry(e.to_string()))?;

    // a broken exporter costs the timings, not the node
    if let Err(e) = telemetrist::init_metrics(&config.metrics, &config.name) {
        log::warn!("Metrics disabled: {}", e);
    }
    let logger = Logger::new();

    let targets = parse_targets(&config.upstream_uris)?;
    let clients = UpstreamClients::build(&targets, &config.client, logger.clone())?;

    log::info!(
        "Starting {} ({}) with {} upstream(s) and {} worker(s)",
        config.name,
        config.server_type,
        targets.len(),
        config.upstream_workers
    );

    let handler = Arc::new(Handler::from_config(&config, targets, Arc::new(clients), logger));
    let listener = TcpListener::bind(config.listen_addr).await?;

    match config.server_type {
        ServerType::Http => http::serve(listener, handler, shutdown_signal()).await?,
        ServerType::Grpc => grpc::serve(listener, handler, shutdown_signal())
            .await
            .map_err(ServiceError::server)?,
    }

    log::info!("{} stopped", config.name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received, draining connections");
}
