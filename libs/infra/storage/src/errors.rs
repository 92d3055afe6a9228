use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("device id has no underscore separator: {0}")]
    MalformedDeviceId(String),
}
