use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Per-broker network picture for the current tick, reconstructed from the
/// metrics backend each evaluation. Rates are MB/s over the query window.
#[derive(Debug, Clone, PartialEq)]
pub struct Broker {
    pub id: u64,
    pub instance_type: String,
    /// Outbound rate in MB/s.
    pub net_tx: f64,
    /// Inbound rate in MB/s.
    pub net_rx: f64,
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed metrics response: {0}")]
    Malformed(String),
}

/// Source of per-broker inbound/outbound rates. Implementations query
/// whatever backend holds broker network telemetry; the control loop only
/// cares about the returned map.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Fetch tx/rx rates for all reporting brokers over the given window.
    /// Brokers missing from the returned map are treated as fetch failures
    /// by the caller.
    async fn broker_metrics(&self, window: Duration) -> Result<HashMap<u64, Broker>, MetricsError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus-compatible API, e.g. "http://prom:9090".
    pub endpoint: String,
    /// Instant query returning per-broker outbound bytes/s. The literal
    /// `{window}` is replaced with the configured window ("60s").
    pub tx_query: String,
    /// Instant query returning per-broker inbound bytes/s.
    pub rx_query: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Queries a Prometheus-compatible HTTP API for broker network rates.
///
/// The configured queries must return one sample per broker labeled with
/// `broker_id` and `instance_type`; values are bytes/s and converted to
/// MB/s here.
#[derive(Clone)]
pub struct PrometheusProvider {
    cfg: PrometheusConfig,
    http: reqwest::Client,
}

impl PrometheusProvider {
    pub fn new(cfg: PrometheusConfig) -> Result<Self, MetricsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self { cfg, http })
    }

    async fn query(&self, template: &str, window: Duration) -> Result<Vec<Sample>, MetricsError> {
        let query = template.replace("{window}", &format!("{}s", window.as_secs()));
        let url = format!("{}/api/v1/query", self.cfg.endpoint);

        let body: Value = self
            .http
            .get(&url)
            .query(&[("query", query.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_samples(&body)
    }
}

/// Extract per-broker samples from an instant-query response body. A
/// malformed sample is skipped rather than failing the query, so one bad
/// series does not blind the control loop to every other broker.
fn parse_samples(body: &Value) -> Result<Vec<Sample>, MetricsError> {
    let results = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .ok_or_else(|| MetricsError::Malformed("missing data.result".to_string()))?;

    let mut samples = Vec::with_capacity(results.len());
    for entry in results {
        let broker_id = entry
            .pointer("/metric/broker_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok());
        let Some(broker_id) = broker_id else {
            warn!("metrics sample missing broker_id label, skipping");
            continue;
        };

        let instance_type = entry
            .pointer("/metric/instance_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Instant vector value: [timestamp, "value"].
        let value = entry
            .pointer("/value/1")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok());
        let Some(value) = value else {
            warn!(broker_id, "metrics sample missing value, skipping");
            continue;
        };

        samples.push(Sample {
            broker_id,
            instance_type,
            bytes_per_sec: value,
        });
    }
    Ok(samples)
}

#[derive(Debug)]
struct Sample {
    broker_id: u64,
    instance_type: String,
    bytes_per_sec: f64,
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[async_trait]
impl MetricsProvider for PrometheusProvider {
    async fn broker_metrics(&self, window: Duration) -> Result<HashMap<u64, Broker>, MetricsError> {
        let tx = self.query(&self.cfg.tx_query, window).await?;
        let rx = self.query(&self.cfg.rx_query, window).await?;

        let mut rx_by_broker: HashMap<u64, f64> = rx
            .into_iter()
            .map(|s| (s.broker_id, s.bytes_per_sec))
            .collect();

        // Only brokers with both sides of the picture are reported;
        // anything partial is left out so the caller treats it as failed.
        let mut brokers: HashMap<u64, Broker> = HashMap::new();
        for sample in tx {
            if let Some(rx_bytes) = rx_by_broker.remove(&sample.broker_id) {
                brokers.insert(
                    sample.broker_id,
                    Broker {
                        id: sample.broker_id,
                        instance_type: sample.instance_type,
                        net_tx: sample.bytes_per_sec / BYTES_PER_MB,
                        net_rx: rx_bytes / BYTES_PER_MB,
                    },
                );
            }
        }
        Ok(brokers)
    }
}
