use crate::utils::join_path;

use autothrottle_metadata_store::{MetadataError, MetadataStorage, MetadataStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

const OVERRIDE_RATE_KEY: &str = "override_rate";

/// Operator-supplied throttle override. A rate of 0 means no override is
/// set. When `auto_remove` is true the control loop clears the record once
/// the active reassignments complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleOverrideConfig {
    pub rate: u64,
    #[serde(default)]
    pub auto_remove: bool,
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("store error: {0}")]
    Store(#[from] MetadataError),
    #[error("unrecognized throttle override record: {0}")]
    Malformed(String),
}

/// Owns the persisted throttle override record. Both the control loop and
/// the admin API go through this type; writes are whole-record
/// replacements with last-write-wins semantics, no compare-and-swap.
#[derive(Debug, Clone)]
pub struct OverrideGovernor {
    store: MetadataStorage,
    path: String,
}

impl OverrideGovernor {
    pub fn new(store: MetadataStorage, prefix: &str) -> Self {
        OverrideGovernor {
            path: join_path(&[prefix, OVERRIDE_RATE_KEY]),
            store,
        }
    }

    /// One-time bootstrap: create the record if absent and upgrade a
    /// legacy bare-integer record to the structured form. Errors here are
    /// fatal at startup; this never runs on the tick path.
    pub async fn bootstrap(&self) -> Result<(), OverrideError> {
        let existing = if self.store.exists(&self.path).await? {
            self.store.get(&self.path).await?
        } else {
            None
        };

        match existing {
            None => {
                self.set(ThrottleOverrideConfig::default()).await?;
                info!(path = %self.path, "created throttle override record");
            }
            Some(value) => {
                if let Some(rate) = legacy_rate(&value) {
                    self.set(ThrottleOverrideConfig {
                        rate,
                        auto_remove: false,
                    })
                    .await?;
                    info!(rate, "throttle override record migrated to structured format");
                } else {
                    // Must already be the structured form; anything else is
                    // a corrupt record and unsafe to run against.
                    serde_json::from_value::<ThrottleOverrideConfig>(value.clone())
                        .map_err(|_| OverrideError::Malformed(value.to_string()))?;
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self) -> Result<ThrottleOverrideConfig, OverrideError> {
        match self.store.get(&self.path).await? {
            None => Ok(ThrottleOverrideConfig::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| OverrideError::Malformed(value.to_string())),
        }
    }

    /// Whole-record replacement of the stored override.
    pub async fn set(&self, config: ThrottleOverrideConfig) -> Result<(), OverrideError> {
        let value = serde_json::to_value(config).map_err(MetadataError::from)?;
        self.store.put(&self.path, value).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), OverrideError> {
        self.set(ThrottleOverrideConfig::default()).await
    }
}

/// A legacy record is a bare integer (or an integer-bearing string) with
/// no auto_remove field.
fn legacy_rate(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
