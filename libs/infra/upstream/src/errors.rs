use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("outbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP post failed: {0}")]
    Http(#[from] reqwest::Error),
}
