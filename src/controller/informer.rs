//! Watch-backed object caches with change callbacks
//!
//! An [`Informer`] mirrors one resource kind into a kube-rs reflector
//! [`Store`] and turns raw watch events into add/update/delete notifications
//! for the callbacks registered on it. Updates that leave `resourceVersion`
//! untouched (re-lists, duplicate deliveries) are swallowed, and objects that
//! vanish across a re-list are reported as deletions.
//!
//! The reflector only publishes a listing on `InitDone`, so changes found
//! while listing are held back until then. A callback never sees an object
//! that the store does not hold yet.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    api::Api,
    client::Client,
    runtime::{
        reflector::{store::Writer, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::key::ObjectKey;
use crate::config::ControllerConfig;
use crate::crd::Remote;

/// A change observed on a cached object
#[derive(Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

impl<K: Resource> ResourceEvent<K> {
    /// The object as of this event (the new version for updates)
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_obj(self.object())
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ResourceEvent::Deleted(_))
    }
}

type Callback<K> = Box<dyn Fn(&ResourceEvent<K>) + Send + Sync>;

/// Becomes true once the informer finished its first full listing
#[derive(Clone, Debug)]
pub struct SyncSignal(watch::Receiver<bool>);

impl SyncSignal {
    pub fn has_synced(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait for the initial listing. Returns `false` if the informer was
    /// dropped before it got there.
    pub async fn wait(mut self) -> bool {
        self.0.wait_for(|synced| *synced).await.is_ok()
    }
}

pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    kind: String,
    writer: Writer<K>,
    store: Store<K>,
    /// Objects seen since the last `Init`, while a (re-)list is in progress
    relist: Option<HashSet<ObjectRef<K>>>,
    /// Changes found during the listing, fired once the store is swapped
    listed: Vec<ResourceEvent<K>>,
    callbacks: Vec<Callback<K>>,
    synced: watch::Sender<bool>,
}

impl<K> Informer<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new() -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        let (synced, _) = watch::channel(false);
        Self {
            kind: K::kind(&K::DynamicType::default()).into_owned(),
            writer,
            store,
            relist: None,
            listed: Vec::new(),
            callbacks: Vec::new(),
            synced,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Read handle on the cached objects
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    pub fn sync_signal(&self) -> SyncSignal {
        SyncSignal(self.synced.subscribe())
    }

    /// Register a callback invoked for every add, real update and delete
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: Fn(&ResourceEvent<K>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Fold one watch event into the cache and notify callbacks
    pub fn apply(&mut self, event: watcher::Event<K>) {
        let mut changes = Vec::new();

        match &event {
            watcher::Event::Apply(obj) => {
                changes.extend(self.diff(obj));
            }
            watcher::Event::Delete(obj) => {
                changes.push(ResourceEvent::Deleted(Arc::new(obj.clone())));
            }
            watcher::Event::Init => {
                debug!(kind = %self.kind, "listing started");
                self.relist = Some(HashSet::new());
                self.listed.clear();
            }
            watcher::Event::InitApply(obj) => {
                let change = self.diff(obj);
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(ObjectRef::from_obj(obj));
                }
                self.listed.extend(change);
            }
            watcher::Event::InitDone => {
                changes.append(&mut self.listed);
                // Anything cached that the fresh listing did not return was
                // deleted while the watch was down.
                if let Some(seen) = self.relist.take() {
                    changes.extend(
                        self.store
                            .state()
                            .into_iter()
                            .filter(|obj| !seen.contains(&ObjectRef::from_obj(obj.as_ref())))
                            .map(ResourceEvent::Deleted),
                    );
                }
            }
        }

        self.writer.apply_watcher_event(&event);

        if matches!(event, watcher::Event::InitDone) && !*self.synced.borrow() {
            info!(kind = %self.kind, objects = self.store.state().len(), "cache synced");
            self.synced.send_replace(true);
        }

        for change in &changes {
            for callback in &self.callbacks {
                callback(change);
            }
        }
    }

    /// Classify an applied object against the cached copy
    fn diff(&self, obj: &K) -> Option<ResourceEvent<K>> {
        let new = Arc::new(obj.clone());
        match self.store.get(&ObjectRef::from_obj(obj)) {
            None => Some(ResourceEvent::Added(new)),
            Some(old) => {
                if old.resource_version().is_some()
                    && old.resource_version() == obj.resource_version()
                {
                    None
                } else {
                    Some(ResourceEvent::Updated { old, new })
                }
            }
        }
    }

    /// Drive the informer from a live watch until the stream ends
    pub async fn run(mut self, api: Api<K>, config: watcher::Config) {
        info!(kind = %self.kind, "starting watch");
        let stream = watcher(api, config).default_backoff();
        futures::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.apply(event),
                Err(e) => warn!(kind = %self.kind, "watch error: {}", e),
            }
        }

        warn!(kind = %self.kind, "watch stream ended");
    }
}

impl<K> Default for Informer<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The four caches the engine reads from
pub struct Informers {
    pub remotes: Informer<Remote>,
    pub config_maps: Informer<ConfigMap>,
    pub deployments: Informer<Deployment>,
    pub services: Informer<Service>,
}

impl Informers {
    pub fn new() -> Self {
        Self {
            remotes: Informer::new(),
            config_maps: Informer::new(),
            deployments: Informer::new(),
            services: Informer::new(),
        }
    }

    pub fn sync_signals(&self) -> Vec<SyncSignal> {
        vec![
            self.remotes.sync_signal(),
            self.config_maps.sync_signal(),
            self.deployments.sync_signal(),
            self.services.sync_signal(),
        ]
    }

    /// Watch Remotes cluster-wide and the gateway singletons by name
    pub async fn run(self, client: Client, config: ControllerConfig) {
        let namespace = config.namespace.as_str();
        let by_name = |name: &str| watcher::Config::default().fields(&format!("metadata.name={name}"));

        tokio::join!(
            self.remotes
                .run(Api::all(client.clone()), watcher::Config::default()),
            self.config_maps.run(
                Api::namespaced(client.clone(), namespace),
                by_name(&config.config_map_name),
            ),
            self.deployments.run(
                Api::namespaced(client.clone(), namespace),
                by_name(&config.deployment_name),
            ),
            self.services.run(
                Api::namespaced(client, namespace),
                by_name(&config.service_name),
            ),
        );
    }
}

impl Default for Informers {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached object by namespace and name
pub fn lookup<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store.get(&ObjectRef::new(name).within(namespace))
}
