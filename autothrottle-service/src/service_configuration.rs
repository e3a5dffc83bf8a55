use crate::limits::LimitsConfig;
use crate::metrics_provider::PrometheusConfig;
use crate::throttle_manager::ThrottleManagerConfig;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// configuration settings loaded from the config file
#[derive(Debug, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Cluster name, used in logs and event tags
    pub(crate) cluster_name: String,
    /// Admin API configuration
    pub(crate) admin: AdminConfig,
    /// Coordination store (etcd) configuration
    pub(crate) meta_store: MetaStoreConfig,
    /// Throttle decision engine configuration
    pub(crate) throttle: ThrottleSettings,
    /// Metrics backend configuration
    pub(crate) metrics: PrometheusConfig,
    /// Optional webhook URL for throttle events
    pub(crate) events_webhook: Option<String>,
}

/// validated configuration the service runs with
#[derive(Debug)]
pub(crate) struct ServiceConfiguration {
    pub(crate) cluster_name: String,
    /// Admin API listen address
    pub(crate) admin_addr: SocketAddr,
    /// Coordination store (etcd) address
    pub(crate) meta_store_addr: String,
    /// Root path for all keys this service owns in the store
    pub(crate) store_prefix: String,
    pub(crate) throttle: ThrottleSettings,
    pub(crate) metrics: PrometheusConfig,
    pub(crate) events_webhook: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminConfig {
    pub(crate) host: String,
    pub(crate) port: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetaStoreConfig {
    pub(crate) host: String,
    pub(crate) port: usize,
    /// Key prefix, defaults to "/autothrottle"
    pub(crate) prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ThrottleSettings {
    /// Evaluation interval in seconds
    #[serde(default = "default_interval_secs")]
    pub(crate) interval_secs: u64,
    /// Metrics query window in seconds
    #[serde(default = "default_metrics_window_secs")]
    pub(crate) metrics_window_secs: u64,
    /// Minimum relative rate change (percent) required to rewrite a broker config
    #[serde(default = "default_change_threshold")]
    pub(crate) change_threshold: f64,
    /// Consecutive metrics failures before falling back to the minimum rate
    #[serde(default = "default_failure_threshold")]
    pub(crate) failure_threshold: u32,
    /// Idle ticks between safety-net sweeps of stale throttle config
    #[serde(default = "default_cleanup_after")]
    pub(crate) cleanup_after: u64,
    /// Floor throttle rate in MB/s
    pub(crate) minimum_rate: f64,
    /// Portion (percent) of free capacity eligible for replication, legacy global cap
    #[serde(default = "default_portion")]
    pub(crate) maximum_portion: f64,
    /// Per-role portion caps (percent)
    #[serde(default = "default_portion")]
    pub(crate) source_maximum_portion: f64,
    #[serde(default = "default_portion")]
    pub(crate) destination_maximum_portion: f64,
    /// Instance type to total network capacity in MB/s
    pub(crate) capacity_map: HashMap<String, f64>,
}

fn default_interval_secs() -> u64 {
    60
}
fn default_metrics_window_secs() -> u64 {
    60
}
fn default_change_threshold() -> f64 {
    10.0
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_cleanup_after() -> u64 {
    60
}
fn default_portion() -> f64 {
    90.0
}

impl ThrottleSettings {
    pub(crate) fn limits_config(&self) -> LimitsConfig {
        LimitsConfig {
            minimum: self.minimum_rate,
            maximum: self.maximum_portion,
            source_maximum: self.source_maximum_portion,
            destination_maximum: self.destination_maximum_portion,
            capacity_map: self.capacity_map.clone(),
        }
    }

    pub(crate) fn manager_config(&self) -> ThrottleManagerConfig {
        ThrottleManagerConfig {
            interval: Duration::from_secs(self.interval_secs),
            metrics_window: Duration::from_secs(self.metrics_window_secs),
            change_threshold: self.change_threshold,
            failure_threshold: self.failure_threshold,
            cleanup_after: self.cleanup_after,
        }
    }
}

impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let admin_addr: SocketAddr = format!("{}:{}", config.admin.host, config.admin.port)
            .parse()
            .context("Failed to create admin_addr")?;

        let meta_store_addr = format!("{}:{}", config.meta_store.host, config.meta_store.port);

        let store_prefix = match config.meta_store.prefix {
            Some(prefix) if prefix.starts_with('/') && !prefix.ends_with('/') => prefix,
            Some(prefix) => anyhow::bail!(
                "store prefix must be an absolute path with no trailing slash: {}",
                prefix
            ),
            None => "/autothrottle".to_string(),
        };

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            admin_addr,
            meta_store_addr,
            store_prefix,
            throttle: config.throttle,
            metrics: config.metrics,
            events_webhook: config.events_webhook,
        })
    }
}
