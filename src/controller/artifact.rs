//! The `remotes.json` document consumed by the gateway
//!
//! The artifact is rebuilt from every cached Remote on each pass and only
//! written when its content hash differs from what the ConfigMap holds.
//! Maps are `BTreeMap`s so the same set of Remotes always renders to the same
//! bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::client::ClusterClient;
use crate::crd::{BuildArg, ManifestsSpec, RegistrySpec, Remote};
use crate::error::Result;

/// ConfigMap data key holding the artifact
pub const REMOTES_JSON_KEY: &str = "remotes.json";

const DOCKERCFG_TYPE: &str = "kubernetes.io/dockercfg";
const DOCKERCONFIGJSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Artifact keyed by `{namespace}-{name}`
pub type Artifact = BTreeMap<String, RemoteEntry>;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Authorized keys, newline separated, ready for `authorized_keys`
    #[serde(rename = "authorized-keys")]
    pub authorized_keys: String,
    pub manifests: Option<ManifestsSpec>,
    pub registry: Option<RegistryEntry>,
    /// Deployment tag `{namespace}.{deployment}` -> container name -> build info
    pub deployments: BTreeMap<String, BTreeMap<String, ContainerEntry>>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockercfg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerconfigjson: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ContainerEntry {
    pub path: String,
    pub dockerfile: String,
    #[serde(rename = "buildArgs")]
    pub build_args: Vec<BuildArg>,
}

/// Build the artifact for `remotes`, projecting registry secrets through `client`
pub async fn build_artifact<C>(remotes: &[Arc<Remote>], client: &C) -> Result<Artifact>
where
    C: ClusterClient + ?Sized,
{
    let mut artifact = Artifact::new();
    for remote in remotes {
        let registry = match remote.spec.registry.as_ref().filter(|r| r.is_declared()) {
            Some(registry) => Some(registry_entry(remote, registry, client).await?),
            None => None,
        };
        artifact.insert(remote.qualified_name(), remote_entry(remote, registry));
    }
    Ok(artifact)
}

/// Render `remotes` into the exact string stored under [`REMOTES_JSON_KEY`]
pub async fn render_artifact<C>(remotes: &[Arc<Remote>], client: &C) -> Result<String>
where
    C: ClusterClient + ?Sized,
{
    let artifact = build_artifact(remotes, client).await?;
    Ok(serde_json::to_string(&artifact)?)
}

fn remote_entry(remote: &Remote, registry: Option<RegistryEntry>) -> RemoteEntry {
    let namespace = remote.namespace().unwrap_or_default();

    let deployments = remote
        .spec
        .deployments
        .iter()
        .map(|deployment| {
            let containers = deployment
                .containers
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        ContainerEntry {
                            path: c.path.clone(),
                            dockerfile: c.dockerfile.clone(),
                            build_args: c.build_args.clone(),
                        },
                    )
                })
                .collect();
            (format!("{}.{}", namespace, deployment.name), containers)
        })
        .collect();

    RemoteEntry {
        authorized_keys: remote.spec.authorized_keys.join("\n"),
        manifests: remote.spec.manifests.clone(),
        registry,
        deployments,
    }
}

/// Registry prefix plus docker credentials when the referenced secret exists
/// and has a docker config type
async fn registry_entry<C>(
    remote: &Remote,
    registry: &RegistrySpec,
    client: &C,
) -> Result<RegistryEntry>
where
    C: ClusterClient + ?Sized,
{
    let mut entry = RegistryEntry {
        prefix: registry.url.clone(),
        dockercfg: None,
        dockerconfigjson: None,
    };

    let Some(secret_name) = registry.secret_name() else {
        return Ok(entry);
    };
    let namespace = remote.namespace().unwrap_or_default();
    let Some(secret) = client.get_secret(&namespace, secret_name).await? else {
        debug!(
            "Registry secret {}/{} for Remote {} not found",
            namespace,
            secret_name,
            remote.name_any()
        );
        return Ok(entry);
    };

    let data = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|value| String::from_utf8_lossy(&value.0).into_owned())
    };
    match secret.type_.as_deref() {
        Some(DOCKERCFG_TYPE) => entry.dockercfg = data(".dockercfg"),
        Some(DOCKERCONFIGJSON_TYPE) => entry.dockerconfigjson = data(".dockerconfigjson"),
        other => debug!(
            "Registry secret {}/{} has unsupported type {:?}",
            namespace, secret_name, other
        ),
    }

    Ok(entry)
}

/// Hex SHA-256 of a rendered artifact
pub fn content_hash(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

/// The artifact currently stored in `config_map`, if any
pub fn stored_artifact(config_map: &ConfigMap) -> Option<&str> {
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(REMOTES_JSON_KEY))
        .map(String::as_str)
}

/// Whether writing `rendered` would change what `config_map` holds
pub fn artifact_changed(config_map: &ConfigMap, rendered: &str) -> bool {
    stored_artifact(config_map).map(content_hash) != Some(content_hash(rendered))
}
