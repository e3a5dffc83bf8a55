mod errors;
pub use errors::MetadataError;
pub(crate) use errors::Result;

mod store;
pub use store::MetadataStore;

mod providers;
pub use providers::{etcd::EtcdStore, in_memory::MemoryStore};

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum MetadataStorage {
    Etcd(EtcdStore),
    InMemory(MemoryStore), // InMemory is used for testing purposes
}

#[async_trait]
impl MetadataStore for MetadataStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self {
            MetadataStorage::Etcd(store) => store.get(key).await,
            MetadataStorage::InMemory(store) => store.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        match self {
            MetadataStorage::Etcd(store) => store.put(key, value).await,
            MetadataStorage::InMemory(store) => store.put(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            MetadataStorage::Etcd(store) => store.delete(key).await,
            MetadataStorage::InMemory(store) => store.delete(key).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            MetadataStorage::Etcd(store) => store.exists(key).await,
            MetadataStorage::InMemory(store) => store.exists(key).await,
        }
    }

    async fn get_childrens(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            MetadataStorage::Etcd(store) => store.get_childrens(prefix).await,
            MetadataStorage::InMemory(store) => store.get_childrens(prefix).await,
        }
    }
}
