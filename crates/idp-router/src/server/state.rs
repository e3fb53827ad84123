//! Application state for the router server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::RouterConfig;
use crate::error::Result;
use crate::pipeline::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RouterConfig,
    pipeline: Arc<Pipeline>,
    ready: RwLock<bool>,
}

impl AppState {
    /// Build backends and pipeline from configuration
    pub async fn new(config: RouterConfig) -> Result<Self> {
        tracing::info!("Initializing router state (backend: {:?})...", config.backend);
        let pipeline = Arc::new(Pipeline::from_config(&config).await?);
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: RouterConfig, pipeline: Arc<Pipeline>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pipeline,
                ready: RwLock::new(true),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Flip readiness off while shutting down
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
