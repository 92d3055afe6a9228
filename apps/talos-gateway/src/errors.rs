use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] talos_shared_config::ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] talos_infra_storage::StorageError),
    #[error("upstream error: {0}")]
    Upstream(#[from] talos_infra_upstream::UpstreamError),
}
