//! gitkube-controller: keeps the gitkube gateway in sync with Remote resources
//!
//! Each `Remote` custom resource describes a git push target. The controller
//! renders all Remotes into the gateway's `remotes.json`, rolls the gateway
//! when that document changes and publishes each Remote's push URL in its
//! status.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
