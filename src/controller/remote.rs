//! Remote sync: regenerate the artifact, then publish the push URL

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::address::external_address;
use super::context::Context;
use super::handler::SyncHandler;
use super::informer::lookup;
use super::key::ObjectKey;
use crate::crd::RemoteStatus;
use crate::error::Result;

pub struct RemoteHandler {
    ctx: Arc<Context>,
}

impl RemoteHandler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SyncHandler for RemoteHandler {
    fn name(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self), fields(controller = "remote"))]
    async fn sync(&self, key: &str) -> Result<()> {
        let key: ObjectKey = key.parse()?;

        // Deletions are folded into the artifact by the ConfigMap queue
        let Some(remote) = lookup(&self.ctx.remotes, &key.namespace, &key.name) else {
            debug!("Remote {} no longer exists", key);
            return Ok(());
        };

        info!("Syncing Remote {}", key);
        self.ctx.sync_artifact().await?;

        let service = self.ctx.gateway_service()?;
        let desired = match external_address(&service) {
            Ok(address) => RemoteStatus::available(remote.remote_url(&address)),
            Err(reason) => RemoteStatus::unavailable(reason.to_string()),
        };

        if remote.status.as_ref() == Some(&desired) {
            debug!("Remote {} status is up to date", key);
            return Ok(());
        }

        self.ctx.client.patch_remote_status(&remote, &desired).await?;
        if desired.remote_url.is_empty() {
            info!("Remote {} has no URL: {}", key, desired.remote_url_desc);
        } else {
            info!("Remote {} is reachable at {}", key, desired.remote_url);
        }
        #[cfg(feature = "metrics")]
        super::metrics::inc_remote_status_update(&key.namespace, &key.name);

        Ok(())
    }
}
