use async_trait::async_trait;

use crate::error::Result;

/// Reconciles one queue key against the cached cluster state.
///
/// Implementations must be idempotent: the engine calls `sync` again for the
/// same key after failures and whenever the key is re-added.
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    /// Controller name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn sync(&self, key: &str) -> Result<()>;
}
