//! Remote Custom Resource Definition
//!
//! A Remote is a git-push target. Pushing to its URL makes the gateway build
//! the listed containers and roll the referenced Deployments.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeploymentSpec, ManifestsSpec, RegistrySpec};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gitkube.sh",
    version = "v1alpha1",
    kind = "Remote",
    namespaced,
    status = "RemoteStatus",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.remoteUrl"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.remoteUrlDesc"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSpec {
    /// SSH public keys allowed to push
    #[serde(default)]
    pub authorized_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<ManifestsSpec>,

    #[serde(default)]
    pub deployments: Vec<DeploymentSpec>,
}

/// Status written by the controller
///
/// `remote_url_desc` explains why `remote_url` is empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    #[serde(default)]
    pub remote_url: String,

    #[serde(default)]
    pub remote_url_desc: String,
}

impl RemoteStatus {
    pub fn available(url: impl Into<String>) -> Self {
        Self {
            remote_url: url.into(),
            remote_url_desc: String::new(),
        }
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self {
            remote_url: String::new(),
            remote_url_desc: description.into(),
        }
    }
}

impl Remote {
    /// `{namespace}-{name}`, the key of this Remote inside `remotes.json`
    /// and the user part of its SSH URL
    pub fn qualified_name(&self) -> String {
        format!(
            "{}-{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Git URL for this Remote behind the given gateway address
    pub fn remote_url(&self, address: &str) -> String {
        let qualified = self.qualified_name();
        format!("ssh://{qualified}@{address}/~/git/{qualified}")
    }
}
