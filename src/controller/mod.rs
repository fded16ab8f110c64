//! Controller module for Remote reconciliation
//!
//! Informers feed per-kind work queues; one worker per queue runs the
//! matching sync handler. The handlers keep the gateway's `remotes.json`,
//! its pod template and every Remote's status in line with the cluster.

pub mod address;
pub mod artifact;
pub mod client;
mod config_map;
pub mod context;
mod engine;
mod gateway;
mod handler;
pub mod informer;
pub mod key;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod queue;
mod remote;
#[cfg(test)]
mod testing;

pub use address::{external_address, AddressError};
pub use client::{ClusterClient, KubeClusterClient};
pub use config_map::ConfigMapHandler;
pub use context::{Context, RESTART_ANNOTATION};
pub use engine::{ControllerState, Engine};
pub use gateway::GatewayHandler;
pub use handler::SyncHandler;
pub use informer::{Informer, Informers, ResourceEvent, SyncSignal};
pub use key::ObjectKey;
pub use queue::WorkQueue;
pub use remote::RemoteHandler;
