//! Observers registered on the pod informer
use crate::SimplePod;
use async_trait::async_trait;
use informer_core::ResourceObject;
use informer_runtime::{dispatcher::HandlerError, EventHandler};
use std::sync::Arc;
use tracing::info;

/// Logs every pod event the informer delivers
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_add(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let pod = SimplePod::from(&*obj);
        info!(%pod, "informer received pod creation event");
        Ok(())
    }

    async fn on_update(&self, old: Arc<ResourceObject>, new: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let (old, new) = (SimplePod::from(&*old), SimplePod::from(&*new));
        info!(%old, %new, "informer received pod updated event");
        Ok(())
    }

    async fn on_delete(&self, obj: Arc<ResourceObject>) -> Result<(), HandlerError> {
        let pod = SimplePod::from(&*obj);
        info!(%pod, "informer received pod deletion event");
        Ok(())
    }
}
