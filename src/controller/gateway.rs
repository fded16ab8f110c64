//! Gateway sync: a changed gateway Service or Deployment can change every
//! Remote's URL, so all of them are queued again.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::context::Context;
use super::handler::SyncHandler;
use super::key::ObjectKey;
use super::queue::WorkQueue;
use crate::error::Result;

pub struct GatewayHandler {
    ctx: Arc<Context>,
    remote_queue: WorkQueue<String>,
}

impl GatewayHandler {
    pub fn new(ctx: Arc<Context>, remote_queue: WorkQueue<String>) -> Self {
        Self { ctx, remote_queue }
    }
}

#[async_trait]
impl SyncHandler for GatewayHandler {
    fn name(&self) -> &'static str {
        "gateway"
    }

    #[instrument(skip(self), fields(controller = "gateway"))]
    async fn sync(&self, key: &str) -> Result<()> {
        let key: ObjectKey = key.parse()?;

        let remotes = self.ctx.remotes.state();
        for remote in &remotes {
            self.remote_queue
                .add(ObjectKey::from_obj(remote.as_ref()).to_string());
        }
        info!("Gateway {} changed, requeued {} remotes", key, remotes.len());
        Ok(())
    }
}
