//! ConfigMap sync: put `remotes.json` back when someone edits it

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::context::Context;
use super::handler::SyncHandler;
use super::key::ObjectKey;
use crate::error::Result;

pub struct ConfigMapHandler {
    ctx: Arc<Context>,
}

impl ConfigMapHandler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl SyncHandler for ConfigMapHandler {
    fn name(&self) -> &'static str {
        "configmap"
    }

    #[instrument(skip(self), fields(controller = "configmap"))]
    async fn sync(&self, key: &str) -> Result<()> {
        let key: ObjectKey = key.parse()?;
        let config = &self.ctx.config;
        if key.namespace != config.namespace || key.name != config.config_map_name {
            debug!("Ignoring ConfigMap {}", key);
            return Ok(());
        }

        let written = self.ctx.sync_artifact().await?;
        debug!("ConfigMap {} synced (written: {})", key, written);
        Ok(())
    }
}
