//! Writes issued by the sync handlers
//!
//! Reads come from the informer caches; everything that mutates the cluster
//! goes through [`ClusterClient`], so handlers can run against an in-memory
//! cluster in tests. Writes carry the cached `resourceVersion`, which makes
//! the API server reject updates based on a stale read.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    ResourceExt,
};
use tracing::debug;

use crate::crd::{Remote, RemoteStatus};
use crate::error::{Error, Result};

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "gitkube-controller";

#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Replace a ConfigMap; fails with a conflict if it changed since read
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Replace a Deployment; fails with a conflict if it changed since read
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Set the status subresource of a Remote
    async fn patch_remote_status(&self, remote: &Remote, status: &RemoteStatus) -> Result<()>;

    /// Fetch a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = config_map.namespace().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Replacing ConfigMap {}/{}", namespace, config_map.name_any());
        api.replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await
            .map_err(Error::KubeError)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let namespace = deployment.namespace().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Replacing Deployment {}/{}", namespace, deployment.name_any());
        api.replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await
            .map_err(Error::KubeError)
    }

    async fn patch_remote_status(&self, remote: &Remote, status: &RemoteStatus) -> Result<()> {
        let namespace = remote.namespace().unwrap_or_default();
        let api: Api<Remote> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({
            "metadata": { "resourceVersion": remote.resource_version() },
            "status": status,
        });
        api.patch_status(
            &remote.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::KubeError)?;

        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::KubeError)
    }
}
