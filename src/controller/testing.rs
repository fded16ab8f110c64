//! In-memory cluster for handler and engine tests
//!
//! [`FakeCluster`] owns the informers the code under test reads from. Seeding
//! helpers and client writes both go through the informers, with a fresh
//! `resourceVersion` per write, so callbacks fire exactly as they would for
//! watch events coming back from a real API server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, LoadBalancerIngress, LoadBalancerStatus, Secret, Service, ServiceSpec,
    ServiceStatus,
};
use kube::api::ObjectMeta;
use kube::error::ErrorResponse;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};

use super::artifact::REMOTES_JSON_KEY;
use super::client::ClusterClient;
use super::context::{Context, RESTART_ANNOTATION};
use super::informer::{lookup, Informers};
use crate::config::ControllerConfig;
use crate::crd::{ContainerSpec, DeploymentSpec, Remote, RemoteSpec, RemoteStatus};
use crate::error::{Error, Result};

pub const GATEWAY_NAMESPACE: &str = "kube-system";

/// A write issued through [`ClusterClient`]
#[derive(Clone, Debug)]
pub enum Write {
    ConfigMap(ConfigMap),
    Deployment(Deployment),
    RemoteStatus { key: String, status: RemoteStatus },
}

#[derive(Default)]
pub struct FakeCluster {
    informers: Mutex<Informers>,
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    writes: Mutex<Vec<Write>>,
    resource_version: AtomicU64,
    /// Number of upcoming writes to reject with a server error
    failing_writes: AtomicUsize,
    /// Number of upcoming Deployment writes to reject
    failing_restarts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

impl FakeCluster {
    /// Run `f` with the informers, e.g. to build an engine on top of them
    pub fn with_informers<R>(&self, f: impl FnOnce(&mut Informers) -> R) -> R {
        f(&mut lock(&self.informers))
    }

    pub fn context(self: &Arc<Self>, config: ControllerConfig) -> Context {
        let client: Arc<dyn ClusterClient> = self.clone();
        self.with_informers(|informers| Context::new(client, config, informers))
    }

    /// Complete the initial listing of every informer
    pub fn mark_synced(&self) {
        let mut informers = lock(&self.informers);
        relist(&mut informers.remotes);
        relist(&mut informers.config_maps);
        relist(&mut informers.deployments);
        relist(&mut informers.services);
    }

    fn stamp<K: Resource>(&self, obj: &mut K) {
        let version = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;
        obj.meta_mut().resource_version = Some(version.to_string());
    }

    pub fn apply_remote(&self, mut remote: Remote) {
        self.stamp(&mut remote);
        lock(&self.informers)
            .remotes
            .apply(watcher::Event::Apply(remote));
    }

    /// Restart the Remote watch and list `remotes`, leaving the listing open
    /// until [`FakeCluster::finish_remote_relist`]
    pub fn start_remote_relist(&self, remotes: Vec<Remote>) {
        let mut informers = lock(&self.informers);
        informers.remotes.apply(watcher::Event::Init);
        for mut remote in remotes {
            if remote.resource_version().is_none() {
                self.stamp(&mut remote);
            }
            informers.remotes.apply(watcher::Event::InitApply(remote));
        }
    }

    pub fn finish_remote_relist(&self) {
        lock(&self.informers)
            .remotes
            .apply(watcher::Event::InitDone);
    }

    pub fn delete_remote(&self, namespace: &str, name: &str) {
        let mut informers = lock(&self.informers);
        if let Some(remote) = lookup(&informers.remotes.store(), namespace, name) {
            informers
                .remotes
                .apply(watcher::Event::Delete((*remote).clone()));
        }
    }

    pub fn apply_config_map(&self, mut config_map: ConfigMap) {
        self.stamp(&mut config_map);
        lock(&self.informers)
            .config_maps
            .apply(watcher::Event::Apply(config_map));
    }

    pub fn apply_deployment(&self, mut deployment: Deployment) {
        self.stamp(&mut deployment);
        lock(&self.informers)
            .deployments
            .apply(watcher::Event::Apply(deployment));
    }

    pub fn apply_service(&self, mut service: Service) {
        self.stamp(&mut service);
        lock(&self.informers)
            .services
            .apply(watcher::Event::Apply(service));
    }

    pub fn insert_secret(&self, secret: Secret) {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        lock(&self.secrets).insert(key, secret);
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_restarts(&self, count: usize) {
        self.failing_restarts.store(count, Ordering::SeqCst);
    }

    pub fn remote(&self, namespace: &str, name: &str) -> Option<Arc<Remote>> {
        lookup(&lock(&self.informers).remotes.store(), namespace, name)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<Arc<ConfigMap>> {
        lookup(&lock(&self.informers).config_maps.store(), namespace, name)
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        lookup(&lock(&self.informers).deployments.store(), namespace, name)
    }

    pub fn writes(&self) -> Vec<Write> {
        lock(&self.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    pub fn config_map_writes(&self) -> Vec<ConfigMap> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::ConfigMap(cm) => Some(cm),
                _ => None,
            })
            .collect()
    }

    pub fn deployment_writes(&self) -> Vec<Deployment> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Deployment(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn status_writes(&self) -> Vec<(String, RemoteStatus)> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::RemoteStatus { key, status } => Some((key, status)),
                _ => None,
            })
            .collect()
    }

    fn check_failure(&self) -> Result<()> {
        if take_one(&self.failing_writes) {
            return Err(api_error(500, "InternalError", "injected failure"));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn relist<K>(informer: &mut super::informer::Informer<K>)
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let objects = informer.store().state();
    informer.apply(watcher::Event::Init);
    for obj in objects {
        informer.apply(watcher::Event::InitApply((*obj).clone()));
    }
    informer.apply(watcher::Event::InitDone);
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

fn conflict<K: Resource>(obj: &K) -> Error {
    api_error(
        409,
        "Conflict",
        &format!("the object {} has been modified", obj.name_any()),
    )
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.check_failure()?;
        let mut informers = lock(&self.informers);
        let namespace = config_map.namespace().unwrap_or_default();
        let current = lookup(&informers.config_maps.store(), &namespace, &config_map.name_any());
        if current.map(|c| c.resource_version()) != Some(config_map.resource_version()) {
            return Err(conflict(config_map));
        }

        let mut stored = config_map.clone();
        self.stamp(&mut stored);
        lock(&self.writes).push(Write::ConfigMap(stored.clone()));
        informers
            .config_maps
            .apply(watcher::Event::Apply(stored.clone()));
        Ok(stored)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        self.check_failure()?;
        if take_one(&self.failing_restarts) {
            return Err(api_error(500, "InternalError", "injected restart failure"));
        }
        let mut informers = lock(&self.informers);
        let namespace = deployment.namespace().unwrap_or_default();
        let current = lookup(&informers.deployments.store(), &namespace, &deployment.name_any());
        if current.map(|c| c.resource_version()) != Some(deployment.resource_version()) {
            return Err(conflict(deployment));
        }

        let mut stored = deployment.clone();
        self.stamp(&mut stored);
        lock(&self.writes).push(Write::Deployment(stored.clone()));
        informers
            .deployments
            .apply(watcher::Event::Apply(stored.clone()));
        Ok(stored)
    }

    async fn patch_remote_status(&self, remote: &Remote, status: &RemoteStatus) -> Result<()> {
        self.check_failure()?;
        let mut informers = lock(&self.informers);
        let namespace = remote.namespace().unwrap_or_default();
        let Some(current) = lookup(&informers.remotes.store(), &namespace, &remote.name_any())
        else {
            return Err(api_error(404, "NotFound", "remote not found"));
        };

        let mut stored = (*current).clone();
        stored.status = Some(status.clone());
        self.stamp(&mut stored);
        lock(&self.writes).push(Write::RemoteStatus {
            key: format!("{}/{}", namespace, remote.name_any()),
            status: status.clone(),
        });
        informers.remotes.apply(watcher::Event::Apply(stored));
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(lock(&self.secrets)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

pub fn remote(namespace: &str, name: &str, deployments: &[&str]) -> Remote {
    let mut remote = Remote::new(
        name,
        RemoteSpec {
            authorized_keys: vec![format!("ssh-rsa AAAA {name}@example")],
            deployments: deployments
                .iter()
                .map(|d| DeploymentSpec {
                    name: d.to_string(),
                    containers: vec![ContainerSpec {
                        name: d.to_string(),
                        path: format!("./{d}"),
                        dockerfile: format!("./{d}/Dockerfile"),
                        build_args: vec![],
                    }],
                })
                .collect(),
            ..Default::default()
        },
    );
    remote.metadata.namespace = Some(namespace.to_string());
    remote
}

fn gateway_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(GATEWAY_NAMESPACE.to_string()),
        ..Default::default()
    }
}

/// The shared ConfigMap, optionally already holding an artifact
pub fn gateway_config_map(artifact: Option<&str>) -> ConfigMap {
    ConfigMap {
        metadata: gateway_meta("gitkube-ci-conf"),
        data: artifact.map(|a| BTreeMap::from([(REMOTES_JSON_KEY.to_string(), a.to_string())])),
        ..Default::default()
    }
}

pub fn gateway_deployment() -> Deployment {
    Deployment {
        metadata: gateway_meta("gitkubed"),
        spec: Some(Default::default()),
        ..Default::default()
    }
}

pub fn load_balancer_service(ip: &str) -> Service {
    Service {
        metadata: gateway_meta("gitkubed"),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
    }
}

pub fn cluster_ip_service() -> Service {
    Service {
        metadata: gateway_meta("gitkubed"),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Restart annotation of a Deployment's pod template
pub fn restart_stamp(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTART_ANNOTATION)
        .cloned()
}

/// Parsed `remotes.json` of a ConfigMap
pub fn artifact_json(config_map: &ConfigMap) -> serde_json::Value {
    let raw = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(REMOTES_JSON_KEY))
        .expect("remotes.json present");
    serde_json::from_str(raw).unwrap()
}

/// Cluster with the gateway installed, exposed through a LoadBalancer
pub fn installed_cluster() -> Arc<FakeCluster> {
    let cluster = Arc::new(FakeCluster::default());
    cluster.apply_config_map(gateway_config_map(None));
    cluster.apply_deployment(gateway_deployment());
    cluster.apply_service(load_balancer_service("1.2.3.4"));
    cluster
}
