use crate::{errors::Result, store::MetadataStore, MetadataError};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// MemoryStore is a simple in-memory key-value store that implements the
/// MetadataStore trait.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(DashMap::new()),
        }
    }

    fn validate(key: &str) -> Result<()> {
        if key.is_empty() || !key.starts_with('/') || key.ends_with('/') {
            return Err(MetadataError::InvalidArguments(format!(
                "key must be an absolute path with no trailing slash: {}",
                key
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Self::validate(key)?;
        Ok(self.inner.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        Self::validate(key)?;
        self.inner.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::validate(key)?;
        self.inner.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Self::validate(key)?;
        Ok(self.inner.contains_key(key))
    }

    async fn get_childrens(&self, prefix: &str) -> Result<Vec<String>> {
        Self::validate(prefix)?;
        let mut children: Vec<String> = self
            .inner
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.len() > prefix.len()
                    && key.starts_with(prefix)
                    && key.as_bytes()[prefix.len()] == b'/'
            })
            .map(|entry| entry.key().clone())
            .collect();
        children.sort();
        Ok(children)
    }
}
