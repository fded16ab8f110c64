//! Error types for the gitkube controller

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API request failed
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Failed to (de)serialize JSON
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A work queue key could not be split into namespace and name
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// One of the gateway singletons installed alongside the controller is absent
    #[error("{kind} {namespace}/{name} not found, is gitkube installed?")]
    MissingResource {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// The informer caches did not finish their initial listing
    #[error("Timed out waiting for caches to sync: {0}")]
    CacheSyncTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether re-running the failed operation may succeed.
    ///
    /// A malformed key stays malformed, so retrying it only burns backoff slots.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::InvalidKey(_) | Error::ConfigError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_key_is_not_retriable() {
        assert!(!Error::InvalidKey("a/b/c".to_string()).is_retriable());
    }

    #[test]
    fn test_missing_resource_is_retriable() {
        let err = Error::MissingResource {
            kind: "ConfigMap",
            namespace: "kube-system".to_string(),
            name: "gitkube-ci-conf".to_string(),
        };
        assert!(err.is_retriable());
        assert_eq!(
            err.to_string(),
            "ConfigMap kube-system/gitkube-ci-conf not found, is gitkube installed?"
        );
    }
}
