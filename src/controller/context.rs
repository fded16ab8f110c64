//! State shared by the sync handlers
//!
//! Holds the cluster client, the informer caches and the gateway location.
//! [`Context::sync_artifact`] is the single place that writes `remotes.json`
//! and rolls the gateway, so the Remote and ConfigMap handlers converge on the
//! same result whichever of them runs first.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use tracing::{debug, info};

use super::artifact::{artifact_changed, content_hash, render_artifact, REMOTES_JSON_KEY};
use super::client::ClusterClient;
use super::informer::{lookup, Informers};
use crate::config::ControllerConfig;
use crate::crd::Remote;
use crate::error::{Error, Result};

/// Pod template annotation whose change rolls the gateway pods
pub const RESTART_ANNOTATION: &str = "gitkube/lasteventtimestamp";

/// Pod template annotation recording the artifact the gateway was rolled for
pub const ARTIFACT_HASH_ANNOTATION: &str = "gitkube/remotes-hash";

pub struct Context {
    pub client: Arc<dyn ClusterClient>,
    pub config: ControllerConfig,
    pub remotes: Store<Remote>,
    pub config_maps: Store<ConfigMap>,
    pub deployments: Store<Deployment>,
    pub services: Store<Service>,
}

impl Context {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: ControllerConfig,
        informers: &Informers,
    ) -> Self {
        Self {
            client,
            config,
            remotes: informers.remotes.store(),
            config_maps: informers.config_maps.store(),
            deployments: informers.deployments.store(),
            services: informers.services.store(),
        }
    }

    pub fn gateway_config_map(&self) -> Result<Arc<ConfigMap>> {
        lookup(
            &self.config_maps,
            &self.config.namespace,
            &self.config.config_map_name,
        )
        .ok_or_else(|| Error::MissingResource {
            kind: "ConfigMap",
            namespace: self.config.namespace.clone(),
            name: self.config.config_map_name.clone(),
        })
    }

    pub fn gateway_deployment(&self) -> Result<Arc<Deployment>> {
        lookup(
            &self.deployments,
            &self.config.namespace,
            &self.config.deployment_name,
        )
        .ok_or_else(|| Error::MissingResource {
            kind: "Deployment",
            namespace: self.config.namespace.clone(),
            name: self.config.deployment_name.clone(),
        })
    }

    pub fn gateway_service(&self) -> Result<Arc<Service>> {
        lookup(
            &self.services,
            &self.config.namespace,
            &self.config.service_name,
        )
        .ok_or_else(|| Error::MissingResource {
            kind: "Service",
            namespace: self.config.namespace.clone(),
            name: self.config.service_name.clone(),
        })
    }

    /// Regenerate `remotes.json` from the cached Remotes.
    ///
    /// The ConfigMap is written only when the content hash differs from what
    /// it stores; each write is followed by a gateway restart. Returns whether
    /// the artifact was written.
    pub async fn sync_artifact(&self) -> Result<bool> {
        let config_map = self.gateway_config_map()?;
        let deployment = self.gateway_deployment()?;

        let remotes = self.remotes.state();
        let rendered = render_artifact(&remotes, self.client.as_ref()).await?;
        let hash = content_hash(&rendered);

        let changed = artifact_changed(&config_map, &rendered);
        if changed {
            let mut updated = (*config_map).clone();
            updated
                .data
                .get_or_insert_with(BTreeMap::new)
                .insert(REMOTES_JSON_KEY.to_string(), rendered);
            self.client.replace_config_map(&updated).await?;
            info!(
                "Updated {} in ConfigMap {}/{} for {} remotes",
                REMOTES_JSON_KEY,
                self.config.namespace,
                config_map.name_any(),
                remotes.len()
            );
            #[cfg(feature = "metrics")]
            super::metrics::inc_artifact_write();
        }

        // A restart that failed after the ConfigMap write is picked up on
        // retry through the recorded hash.
        let pending_restart = restarted_for(&deployment).is_some_and(|h| h != hash);
        if !changed && !pending_restart {
            debug!("{} unchanged, skipping gateway restart", REMOTES_JSON_KEY);
            return Ok(changed);
        }

        let restarted = with_restart_annotation(&deployment, &hash, Utc::now().timestamp());
        self.client.replace_deployment(&restarted).await?;
        info!(
            "Restarted gateway Deployment {}/{}",
            self.config.namespace,
            deployment.name_any()
        );
        #[cfg(feature = "metrics")]
        super::metrics::inc_gateway_restart();

        Ok(changed)
    }
}

/// Artifact hash the gateway pods were last rolled for
fn restarted_for(deployment: &Deployment) -> Option<&str> {
    pod_template_annotations(deployment)?
        .get(ARTIFACT_HASH_ANNOTATION)
        .map(String::as_str)
}

fn pod_template_annotations(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()
}

/// Next restart stamp; strictly greater than `previous` so two restarts
/// within the same second still change the pod template
pub fn next_restart_stamp(previous: Option<i64>, now: i64) -> i64 {
    match previous {
        Some(previous) if previous >= now => previous + 1,
        _ => now,
    }
}

/// Copy of `deployment` with a bumped restart annotation on its pod template
pub fn with_restart_annotation(deployment: &Deployment, hash: &str, now: i64) -> Deployment {
    let previous = pod_template_annotations(deployment)
        .and_then(|a| a.get(RESTART_ANNOTATION))
        .and_then(|v| v.parse::<i64>().ok());

    let mut updated = deployment.clone();
    let annotations = updated
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(
        RESTART_ANNOTATION.to_string(),
        next_restart_stamp(previous, now).to_string(),
    );
    annotations.insert(ARTIFACT_HASH_ANNOTATION.to_string(), hash.to_string());
    updated
}
