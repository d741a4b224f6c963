use common::config::ConfigError;

/// Failures that abort construction of a resolver.
///
/// Store interaction never produces one of these: an unreachable store or a
/// missing path is an empty service, not an error.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("A service name is required")]
    MissingServiceName,
    #[error("A service path is required")]
    MissingPath,
    #[error("Invalid discovery configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Service resolution must be started from within a tokio runtime")]
    NoRuntime,
}

/// Failures reported by a coordination store client
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}
