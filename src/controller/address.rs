//! External address of the gateway Service
//!
//! Maps the Service's exposure mode to a host that users can push to. The
//! failure messages are written verbatim into `Remote.status.remoteUrlDesc`.

use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use thiserror::Error;

pub const CLUSTER_IP: &str = "ClusterIP";
pub const EXTERNAL_NAME: &str = "ExternalName";
pub const LOAD_BALANCER: &str = "LoadBalancer";
pub const NODE_PORT: &str = "NodePort";

/// Why no external address could be derived
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("gitkube service type ClusterIP cannot be accessed from outside cluster. If this was intended, add remote manually")]
    Unreachable,

    #[error("gitkube service of type LoadBalancer has no available IP/hostnames")]
    NotReady,

    #[error("gitkube service of type {service_type} has unknown IP/hostname")]
    UnknownAddress { service_type: String },

    #[error("manually configure remote for gitkube service of type NodePort. E.g.: ssh://<namespace>-<remote-name>@<any-node-ip>:{node_port}/~/git/<namespace>-<remote-name>")]
    ManualConfigRequired {
        /// Allocated node port, or a `<node-port>` placeholder
        node_port: String,
    },

    #[error("unknown gitkubed service type {0}. Is gitkubed service exposed?")]
    UnsupportedExposure(String),
}

/// Resolve the address users should push to for `service`
pub fn external_address(service: &Service) -> Result<String, AddressError> {
    let spec = service.spec.as_ref();
    // The API server defaults an unset type to ClusterIP
    let service_type = spec
        .and_then(|s| s.type_.as_deref())
        .unwrap_or(CLUSTER_IP);

    match service_type {
        CLUSTER_IP => Err(AddressError::Unreachable),
        EXTERNAL_NAME => Ok(spec
            .and_then(|s| s.external_name.clone())
            .unwrap_or_default()),
        LOAD_BALANCER => {
            let ingress = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ingress| ingress.first())
                .ok_or(AddressError::NotReady)?;

            load_balancer_ip_or_name(ingress).ok_or_else(|| AddressError::UnknownAddress {
                service_type: LOAD_BALANCER.to_string(),
            })
        }
        NODE_PORT => Err(AddressError::ManualConfigRequired {
            node_port: spec
                .and_then(|s| s.ports.as_ref())
                .and_then(|ports| ports.first())
                .and_then(|port| port.node_port)
                .map(|port| port.to_string())
                .unwrap_or_else(|| "<node-port>".to_string()),
        }),
        other => Err(AddressError::UnsupportedExposure(other.to_string())),
    }
}

/// IP of a load balancer ingress entry, falling back to its hostname
fn load_balancer_ip_or_name(ingress: &LoadBalancerIngress) -> Option<String> {
    ingress
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .or_else(|| ingress.hostname.clone().filter(|h| !h.is_empty()))
}
