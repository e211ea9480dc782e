//! Live applications view of a registry
//!
//! Follows [`Interest::All`] and folds every notification into an
//! [`Applications`] view, which is what full-registry reads are served from.

use crate::error::RegistryResult;
use crate::registry::Registry;
use eddy_core::{Applications, ChangeNotification, Interest, StreamState};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

/// Continuously updated [`Applications`] view
pub struct RegistryView {
    apps: Arc<RwLock<Applications>>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl RegistryView {
    /// Subscribe to `registry` and start folding notifications
    pub async fn start<R: Registry + ?Sized>(registry: &R) -> RegistryResult<Self> {
        let mut stream = registry.for_interest(Interest::All).await?;
        let apps = Arc::new(RwLock::new(Applications::new()));
        let (ready_tx, ready) = watch::channel(false);

        let view = apps.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(ChangeNotification::StreamState(StreamState::BufferEnd)) => {
                        let _ = ready_tx.send(true);
                    }
                    Ok(notification) => {
                        view.write().await.apply(&notification);
                    }
                    Err(e) => {
                        warn!(error = %e, "registry view stream failed");
                        break;
                    }
                }
            }
        });

        Ok(Self { apps, ready, task })
    }

    /// Wait until the initial snapshot has been applied
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.clone();
        // An Err means the task ended; the view is as ready as it gets
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Copy of the current view
    pub async fn applications(&self) -> Applications {
        self.apps.read().await.clone()
    }

    /// Reconcile hash code of the current view
    pub async fn reconcile_hash_code(&self) -> String {
        self.apps.read().await.reconcile_hash_code()
    }

    /// Whether the view is still following the registry
    pub fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for RegistryView {
    fn drop(&mut self) {
        self.task.abort();
    }
}
