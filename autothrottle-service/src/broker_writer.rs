use crate::utils::join_path;

use autothrottle_metadata_store::{MetadataError, MetadataStorage, MetadataStore};
use serde::{Deserialize, Serialize};

/// Effective replication throttle rates for one broker, one field per role
/// the broker currently holds. Persisted as the broker's throttle record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerThrottleRates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_rate: Option<f64>,
}

/// Writes broker-level throttle configuration into the coordination store
/// at `<prefix>/brokers/<id>`. Apply and clear are idempotent.
#[derive(Debug, Clone)]
pub struct ThrottleWriter {
    store: MetadataStorage,
    base_path: String,
}

impl ThrottleWriter {
    pub fn new(store: MetadataStorage, prefix: &str) -> Self {
        ThrottleWriter {
            store,
            base_path: join_path(&[prefix, "brokers"]),
        }
    }

    fn broker_path(&self, broker_id: u64) -> String {
        join_path(&[&self.base_path, &broker_id.to_string()])
    }

    pub async fn apply(
        &self,
        broker_id: u64,
        rates: BrokerThrottleRates,
    ) -> Result<(), MetadataError> {
        let value = serde_json::to_value(rates)?;
        self.store.put(&self.broker_path(broker_id), value).await
    }

    pub async fn clear(&self, broker_id: u64) -> Result<(), MetadataError> {
        self.store.delete(&self.broker_path(broker_id)).await
    }

    /// Brokers that currently carry a throttle record in the store. Used
    /// by the global clear so configs written by a previous process run
    /// are swept too.
    pub async fn throttled_brokers(&self) -> Result<Vec<u64>, MetadataError> {
        let children = self.store.get_childrens(&self.base_path).await?;
        let mut ids = Vec::with_capacity(children.len());
        for path in children {
            if let Some(id) = path.rsplit('/').next().and_then(|s| s.parse::<u64>().ok()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autothrottle_metadata_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_clear_enumerate() -> Result<(), MetadataError> {
        let store = MetadataStorage::InMemory(MemoryStore::new());
        let writer = ThrottleWriter::new(store.clone(), "/autothrottle");

        writer
            .apply(
                1001,
                BrokerThrottleRates {
                    source_rate: Some(80.0),
                    destination_rate: None,
                },
            )
            .await?;
        writer
            .apply(
                1002,
                BrokerThrottleRates {
                    source_rate: None,
                    destination_rate: Some(45.5),
                },
            )
            .await?;

        // Absent roles are omitted from the record.
        assert_eq!(
            store.get("/autothrottle/brokers/1001").await?,
            Some(json!({"source_rate": 80.0}))
        );

        let mut ids = writer.throttled_brokers().await?;
        ids.sort();
        assert_eq!(ids, vec![1001, 1002]);

        writer.clear(1001).await?;
        assert_eq!(writer.throttled_brokers().await?, vec![1002]);

        // Clearing an already-clear broker is a no-op.
        writer.clear(1001).await?;
        Ok(())
    }
}
