//! Shared types used by the Remote CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// External registry that built images are pushed to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Registry prefix, e.g. `registry.harbor.io/library`
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsSpec>,
}

impl RegistrySpec {
    /// Older clients send an empty `registry: {}` instead of omitting it
    pub fn is_declared(&self) -> bool {
        !self.url.is_empty() || self.credentials.is_some()
    }

    /// Name of the docker-registry secret holding push credentials, if any
    pub fn secret_name(&self) -> Option<&str> {
        let credentials = self.credentials.as_ref()?;
        credentials
            .secret_ref
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| {
                credentials
                    .secret_key_ref
                    .as_ref()
                    .map(|r| r.name.as_str())
                    .filter(|name| !name.is_empty())
            })
    }
}

/// Registry credentials, referenced by secret name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSpec {
    /// Name of a `kubernetes.io/dockercfg` or `kubernetes.io/dockerconfigjson` secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Legacy selector form; only the secret name is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Kubernetes manifests applied by the gateway before building
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsSpec {
    /// Directory of raw manifests inside the pushed repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelmSpec {
    #[serde(default)]
    pub release: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<HelmValue>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct HelmValue {
    pub name: String,
    pub value: String,
}

/// A Deployment whose containers are rebuilt on every push
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub name: String,

    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,

    /// Build context, relative to the repository root
    #[serde(default)]
    pub path: String,

    /// Dockerfile location, relative to the repository root
    #[serde(default)]
    pub dockerfile: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<BuildArg>,
}

/// A single `--build-arg NAME=VALUE`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BuildArg {
    pub name: String,
    pub value: String,
}
