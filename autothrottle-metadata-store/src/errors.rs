use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}
