//! Queue wiring and worker loops
//!
//! Informer callbacks only enqueue keys; all cluster reads and writes happen
//! in the workers. One worker drains each queue, so at most one pass per kind
//! runs at a time and a key is never synced concurrently with itself.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::Store;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

use super::client::ClusterClient;
use super::config_map::ConfigMapHandler;
use super::context::Context;
use super::gateway::GatewayHandler;
use super::handler::SyncHandler;
use super::informer::{Informers, ResourceEvent, SyncSignal};
use super::queue::WorkQueue;
use super::remote::RemoteHandler;
use crate::config::ControllerConfig;
use crate::crd::Remote;
use crate::error::{Error, Result};

/// Read-only view of the engine for the HTTP endpoints
pub struct ControllerState {
    ready: AtomicBool,
    remotes: Store<Remote>,
}

impl ControllerState {
    /// True once the caches synced and workers are running
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Number of Remotes currently cached
    pub fn remote_count(&self) -> usize {
        self.remotes.state().len()
    }
}

pub struct Engine {
    ctx: Arc<Context>,
    state: Arc<ControllerState>,
    remote_queue: WorkQueue<String>,
    config_map_queue: WorkQueue<String>,
    gateway_queue: WorkQueue<String>,
    sync_signals: Vec<SyncSignal>,
}

impl Engine {
    /// Create the queues and register the enqueue callbacks on `informers`.
    ///
    /// The informers must be started after this call so no event is missed.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: ControllerConfig,
        informers: &mut Informers,
    ) -> Self {
        let remote_queue = WorkQueue::new("remote", config.queue);
        let config_map_queue = WorkQueue::new("configmap", config.queue);
        let gateway_queue = WorkQueue::new("gateway", config.queue);

        {
            let queue = remote_queue.clone();
            let config_map_queue = config_map_queue.clone();
            let config_map_key = config.config_map_key();
            informers.remotes.on_event(move |event| {
                queue.add(event.key().to_string());
                // The Remote handler skips vanished Remotes, so the artifact
                // is regenerated through the ConfigMap queue.
                if event.is_delete() {
                    config_map_queue.add(config_map_key.clone());
                }
            });
        }
        {
            let queue = config_map_queue.clone();
            let (namespace, name) = (config.namespace.clone(), config.config_map_name.clone());
            informers.config_maps.on_event(move |event| {
                if is_named(event.object(), &namespace, &name) {
                    queue.add(event.key().to_string());
                }
            });
        }
        {
            let queue = gateway_queue.clone();
            let (namespace, name) = (config.namespace.clone(), config.deployment_name.clone());
            informers.deployments.on_event(move |event| {
                if is_named(event.object(), &namespace, &name) && is_spec_change(event) {
                    queue.add(event.key().to_string());
                }
            });
        }
        {
            let queue = gateway_queue.clone();
            let (namespace, name) = (config.namespace.clone(), config.service_name.clone());
            informers.services.on_event(move |event| {
                if is_named(event.object(), &namespace, &name) {
                    queue.add(event.key().to_string());
                }
            });
        }

        let state = Arc::new(ControllerState {
            ready: AtomicBool::new(false),
            remotes: informers.remotes.store(),
        });
        let sync_signals = informers.sync_signals();
        let ctx = Arc::new(Context::new(client, config, informers));

        Self {
            ctx,
            state,
            remote_queue,
            config_map_queue,
            gateway_queue,
            sync_signals,
        }
    }

    pub fn state(&self) -> Arc<ControllerState> {
        Arc::clone(&self.state)
    }

    /// Wait for the caches, process keys until `shutdown` resolves, then
    /// let in-flight passes finish.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        futures::pin_mut!(shutdown);
        let queues = [
            self.remote_queue.clone(),
            self.config_map_queue.clone(),
            self.gateway_queue.clone(),
        ];

        info!("Waiting for informer caches to sync");
        let timeout = self.ctx.config.cache_sync_timeout;
        let synced = join_all(self.sync_signals.into_iter().map(SyncSignal::wait));
        let failure = tokio::select! {
            results = synced => {
                if results.iter().all(|ok| *ok) {
                    None
                } else {
                    Some("an informer stopped before its initial listing".to_string())
                }
            }
            _ = tokio::time::sleep(timeout) => {
                Some(format!("caches not synced after {}s", timeout.as_secs()))
            }
            _ = &mut shutdown => Some("stop signal received".to_string()),
        };
        if let Some(reason) = failure {
            for queue in &queues {
                queue.shut_down();
            }
            return Err(Error::CacheSyncTimeout(reason));
        }
        info!("Caches synced, starting workers");

        let workers = vec![
            tokio::spawn(run_worker(
                self.remote_queue.clone(),
                Arc::new(RemoteHandler::new(Arc::clone(&self.ctx))),
            )),
            tokio::spawn(run_worker(
                self.config_map_queue.clone(),
                Arc::new(ConfigMapHandler::new(Arc::clone(&self.ctx))),
            )),
            tokio::spawn(run_worker(
                self.gateway_queue.clone(),
                Arc::new(GatewayHandler::new(
                    Arc::clone(&self.ctx),
                    self.remote_queue.clone(),
                )),
            )),
        ];
        self.state.ready.store(true, Ordering::SeqCst);

        shutdown.await;
        info!("Stop signal received, draining queues");
        self.state.ready.store(false, Ordering::SeqCst);

        join_all(queues.iter().map(|queue| queue.shut_down_with_drain())).await;
        for worker in join_all(workers).await {
            if let Err(e) = worker {
                error!("Worker task failed: {}", e);
            }
        }
        info!("All workers stopped");
        Ok(())
    }
}

fn is_named<K: Resource>(obj: &K, namespace: &str, name: &str) -> bool {
    obj.namespace().as_deref() == Some(namespace) && obj.name_any() == name
}

/// False for Deployment updates that keep `metadata.generation`, i.e. rollout
/// status churn
pub(crate) fn is_spec_change(event: &ResourceEvent<Deployment>) -> bool {
    match event {
        ResourceEvent::Updated { old, new } => {
            old.metadata.generation.is_none()
                || old.metadata.generation != new.metadata.generation
        }
        _ => true,
    }
}

async fn run_worker<H: SyncHandler>(queue: WorkQueue<String>, handler: Arc<H>) {
    info!(queue = queue.name(), "Worker started");
    while let Some(key) = queue.next().await {
        process_item(&queue, &handler, key).await;
    }
    info!(queue = queue.name(), "Worker stopped");
}

/// Run one pass for `key` and settle its backoff
pub(crate) async fn process_item<H: SyncHandler>(
    queue: &WorkQueue<String>,
    handler: &Arc<H>,
    key: String,
) {
    let started = Instant::now();

    // A panicking handler must not take the worker down with it.
    let pass = {
        let handler = Arc::clone(handler);
        let key = key.clone();
        tokio::spawn(async move { handler.sync(&key).await })
    };
    let result = pass.await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration(handler.name(), started.elapsed().as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    match result {
        Ok(Ok(())) => queue.forget(&key),
        Ok(Err(e)) if !e.is_retriable() => {
            error!(queue = queue.name(), "Dropping {}: {}", key, e);
            #[cfg(feature = "metrics")]
            super::metrics::inc_reconcile_error(handler.name(), &e);
            queue.forget(&key);
        }
        Ok(Err(e)) => {
            warn!(
                queue = queue.name(),
                retries = queue.retries(&key),
                "Error syncing {}: {}",
                key,
                e
            );
            #[cfg(feature = "metrics")]
            {
                super::metrics::inc_reconcile_error(handler.name(), &e);
                super::metrics::inc_queue_retry(queue.name());
            }
            queue.add_rate_limited(key.clone());
        }
        Err(join_error) => {
            error!(queue = queue.name(), "Sync of {} panicked: {}", key, join_error);
            #[cfg(feature = "metrics")]
            super::metrics::inc_queue_retry(queue.name());
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
}
