use crate::{errors::Result, store::MetadataStore, MetadataError};

use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use serde_json::Value;

/// Etcd-backed implementation of the MetadataStore trait.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    addr: String,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore").field("addr", &self.addr).finish()
    }
}

impl EtcdStore {
    pub async fn new(addr: String) -> Result<Self> {
        let client = Client::connect([addr.as_str()], None).await?;
        Ok(EtcdStore { client, addr })
    }
}

#[async_trait]
impl MetadataStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;

        match resp.kvs().first() {
            Some(kv) => {
                let value: Value = serde_json::from_slice(kv.value())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut client = self.client.clone();
        let payload = serde_json::to_vec(&value)?;
        client.put(key, payload, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client
            .get(key, Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(resp.count() > 0)
    }

    async fn get_childrens(&self, prefix: &str) -> Result<Vec<String>> {
        if prefix.is_empty() {
            return Err(MetadataError::InvalidArguments(
                "prefix must not be empty".to_string(),
            ));
        }

        let mut client = self.client.clone();
        let resp = client
            .get(
                prefix,
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;

        let mut children = Vec::new();
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            // Strictly-below matches only: skip the prefix key itself and
            // sibling keys that merely share the prefix string.
            if key.len() > prefix.len() && key.as_bytes()[prefix.len()] == b'/' {
                children.push(key.to_string());
            }
        }
        Ok(children)
    }
}
