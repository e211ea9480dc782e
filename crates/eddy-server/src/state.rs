//! Server state shared by the HTTP handlers
//!
//! TigerStyle: One cheaply cloned handle, every field immutable after startup.

use eddy_cluster::ReplicationHandler;
use eddy_registry::{Registry, RegistryView};
use std::sync::Arc;
use std::time::Instant;

/// Server-wide shared state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// This node's id
    node_id: String,
    /// The replicating registry; local writes go here
    registry: Arc<dyn Registry>,
    /// Applies peer writes to the undecorated store
    handler: ReplicationHandler,
    /// Live view backing `GET /apps`
    view: RegistryView,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl AppState {
    /// Create the state
    ///
    /// `registry` receives local writes and is expected to replicate them;
    /// `store` is the plain store peer writes are applied to, so they are
    /// never sent back out.
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<dyn Registry>,
        store: Arc<dyn Registry>,
        view: RegistryView,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                node_id: node_id.into(),
                registry,
                handler: ReplicationHandler::new(store),
                view,
                start_time: Instant::now(),
            }),
        }
    }

    /// This node's id
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// The replicating registry
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.inner.registry
    }

    /// Handler for peer replication requests
    pub fn handler(&self) -> &ReplicationHandler {
        &self.inner.handler
    }

    /// Live applications view
    pub fn view(&self) -> &RegistryView {
        &self.inner.view
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
