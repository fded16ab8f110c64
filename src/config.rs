//! Runtime configuration for the reconciliation engine
//!
//! Everything here is passed explicitly into [`crate::controller::Engine::new`];
//! nothing is read from process-wide state after startup.

use std::time::Duration;

/// Default namespace the gateway singletons are installed into
pub const DEFAULT_NAMESPACE: &str = "kube-system";
/// Default name of the ConfigMap holding `remotes.json`
pub const DEFAULT_CONFIG_MAP_NAME: &str = "gitkube-ci-conf";
/// Default name of the gateway Deployment
pub const DEFAULT_DEPLOYMENT_NAME: &str = "gitkubed";
/// Default name of the gateway Service
pub const DEFAULT_SERVICE_NAME: &str = "gitkubed";

/// Location of the gateway singletons and engine tunables
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding the shared ConfigMap, Deployment and Service
    pub namespace: String,
    pub config_map_name: String,
    pub deployment_name: String,
    pub service_name: String,
    /// How long startup may wait for every informer's initial listing
    pub cache_sync_timeout: Duration,
    pub queue: QueueConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            config_map_name: DEFAULT_CONFIG_MAP_NAME.to_string(),
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            cache_sync_timeout: Duration::from_secs(120),
            queue: QueueConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Queue key of the shared ConfigMap
    pub fn config_map_key(&self) -> String {
        format!("{}/{}", self.namespace, self.config_map_name)
    }
}

/// Per-key retry backoff for the change queues
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Delay before the first retry; doubles on every consecutive failure
    pub base_delay: Duration,
    /// Upper bound for the retry delay
    pub max_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}
