use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use umbra_cloud::{ArmNetworkApi, CloudContext, Credentials, NetworkApi};
use umbra_controller::{
    ClusterClient, ConnectionReconciler, Controller, HttpClusterClient, IntentCache,
    IntentSource, ServiceReconciler, WatchHub,
};
use umbra_core::{EventReporter, LogReporter};

mod config;
mod source;

use config::Config;
use source::HttpIntentSource;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Starting umbra private link controllers");

    let credentials = Credentials::from_file(&config.auth_file)
        .map_err(|e| miette::miette!("Failed to load cloud credentials: {}", e))?;
    let api: Arc<dyn NetworkApi> = Arc::new(
        ArmNetworkApi::new(credentials)
            .map_err(|e| miette::miette!("Failed to build the cloud client: {}", e))?,
    );

    // Resolving the vnet up front pins the location and fails fast on a
    // misconfigured environment.
    let reporter: Arc<dyn EventReporter> = Arc::new(LogReporter);
    let cloud = Arc::new(
        CloudContext::connect(api, config.cloud_settings(), reporter.clone())
            .await
            .map_err(|e| miette::miette!("Cloud setup failed: {}", e))?,
    );
    info!("Cloud context ready in location '{}'", cloud.location());

    let cluster: Arc<dyn ClusterClient> = Arc::new(
        HttpClusterClient::new(&config.api_url)
            .map_err(|e| miette::miette!("Failed to build the cluster client: {}", e))?,
    );
    let source: Arc<dyn IntentSource> = Arc::new(
        HttpIntentSource::new(&config.api_url)
            .map_err(|e| miette::miette!("Failed to build the intent source: {}", e))?,
    );

    let cache = Arc::new(IntentCache::new());
    let hub = Arc::new(WatchHub::new(cache.clone(), config.sync_period()));

    // Controllers subscribe at construction, so building them before the
    // hub starts means they see every event including the seed snapshot.
    let service_controller = Controller::new(
        ServiceReconciler::new(
            cloud.clone(),
            cluster.clone(),
            cache.clone(),
            config.service_annotation.clone(),
        ),
        &hub,
        config.controller_config(),
    );
    let connection_controller = Controller::new(
        ConnectionReconciler::new(cloud, cluster, cache, reporter),
        &hub,
        config.controller_config(),
    );

    let token = CancellationToken::new();

    // 1. Spawn the watch hub
    let hub_handle = {
        let hub = hub.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = hub.run(source, token).await {
                error!("Watch hub error: {}", e);
            }
        })
    };

    // 2. Spawn both controllers
    let service_handle = tokio::spawn(service_controller.run(token.clone()));
    let connection_handle = tokio::spawn(connection_controller.run(token.clone()));

    info!("All components started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // In-flight syncs get a window to finish
    let shutdown_timeout = std::time::Duration::from_secs(15);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(hub_handle, service_handle, connection_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}
