use crate::errors::Result;

use async_trait::async_trait;
use serde_json::Value;

/// Hierarchical key/value interface over the coordination store.
///
/// Keys are slash-separated paths. Values are JSON documents. The trait is
/// deliberately small: the service only needs get/put/delete/exists plus
/// child enumeration for cleanup sweeps.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read the value stored at the given path, None if absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Create or overwrite the value at the given path.
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Delete the value at the given path. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a value exists at the given path.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Return the full paths of all keys strictly below the given prefix.
    async fn get_childrens(&self, prefix: &str) -> Result<Vec<String>>;
}
