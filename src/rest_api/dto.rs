//! Response bodies of the HTTP endpoints

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// Remotes currently held in the cache
    pub remotes: usize,
}
