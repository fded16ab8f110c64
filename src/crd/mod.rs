//! Custom Resource Definitions for gitkube
//!
//! This module defines the `Remote` CRD (`remotes.gitkube.sh`).

mod remote;
pub mod types;


pub use remote::{Remote, RemoteSpec, RemoteStatus};
pub use types::*;
