mod api;
mod args_parse;
mod broker_writer;
mod events;
mod limits;
mod metrics_provider;
mod reassignments;
mod service_configuration;
mod throttle_manager;
mod throttle_override;
mod utils;

#[cfg(test)]
mod throttle_manager_test;

use crate::{
    api::{build_router, ApiState},
    args_parse::Args,
    broker_writer::ThrottleWriter,
    events::{EventSink, LogSink, WebhookSink},
    limits::Limits,
    metrics_provider::PrometheusProvider,
    reassignments::ReassignmentDiscovery,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
    throttle_manager::ThrottleManager,
    throttle_override::OverrideGovernor,
};

use anyhow::{Context, Result};
use autothrottle_metadata_store::{EtcdStore, MetadataStorage};
use std::net::SocketAddr;
use std::{fs::read_to_string, path::Path, sync::Arc};
use tracing::{error, info};
use tracing_subscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `admin_addr` is provided via command-line args, override the value from the config file
    if let Some(admin_addr) = args.admin_addr {
        let admin_address: SocketAddr = admin_addr.parse().context(format!(
            "Failed to parse into Socket address: {}",
            admin_addr
        ))?;
        service_config.admin_addr = admin_address;
    }

    // If `meta_store_addr` is provided via command-line args, override the value from the config file
    if let Some(meta_store_addr) = args.meta_store_addr {
        service_config.meta_store_addr = meta_store_addr;
    }

    info!(
        cluster = %service_config.cluster_name,
        addr = %service_config.meta_store_addr,
        "Initializing ETCD as coordination store"
    );
    let metadata_store =
        MetadataStorage::Etcd(EtcdStore::new(service_config.meta_store_addr.clone()).await?);

    // Validate throttle limits once; misconfiguration is fatal here.
    let limits = Limits::new(service_config.throttle.limits_config())
        .context("invalid throttle limits configuration")?;

    // Bootstrap the override record (create + legacy migration); fatal on failure.
    let governor = OverrideGovernor::new(metadata_store.clone(), &service_config.store_prefix);
    governor
        .bootstrap()
        .await
        .context("throttle override bootstrap failed")?;

    // Admin API serves concurrently with the control loop.
    let api_state = Arc::new(ApiState {
        governor: governor.clone(),
    });
    let listener = tokio::net::TcpListener::bind(service_config.admin_addr)
        .await
        .context(format!(
            "Failed to bind admin API to {}",
            service_config.admin_addr
        ))?;
    info!(addr = %service_config.admin_addr, "admin API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router(api_state)).await {
            error!(error = %e, "admin API server terminated");
        }
    });

    let metrics_provider = Arc::new(
        PrometheusProvider::new(service_config.metrics.clone())
            .context("failed to build metrics provider")?,
    );

    let events: Arc<dyn EventSink> = match &service_config.events_webhook {
        Some(url) => Arc::new(
            WebhookSink::new(url.clone()).context("failed to build webhook event sink")?,
        ),
        None => Arc::new(LogSink),
    };

    let manager = ThrottleManager::new(
        service_config.throttle.manager_config(),
        limits,
        governor,
        ReassignmentDiscovery::new(metadata_store.clone(), &service_config.store_prefix),
        ThrottleWriter::new(metadata_store, &service_config.store_prefix),
        metrics_provider,
        events,
    );

    manager.run().await;
    Ok(())
}
