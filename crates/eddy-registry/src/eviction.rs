//! Periodic eviction of expired leases
//!
//! TigerStyle: Explicit task lifecycle, graceful shutdown via notify.

use crate::registry::Registry;
use eddy_core::{IoContext, RegistryConfig};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs [`Registry::evict`] every `eviction_interval_ms`
pub struct EvictionScheduler<R: Registry + 'static> {
    registry: Arc<R>,
    io: IoContext,
    interval_ms: u64,
    task: RwLock<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl<R: Registry + 'static> EvictionScheduler<R> {
    /// Create a scheduler; nothing runs until [`start`](Self::start)
    pub fn new(registry: Arc<R>, config: &RegistryConfig, io: IoContext) -> Self {
        Self {
            registry,
            io,
            interval_ms: config.eviction_interval_ms,
            task: RwLock::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Whether the sweep task is running
    pub async fn is_running(&self) -> bool {
        self.task
            .read()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the sweep task; a second call is a no-op
    pub async fn start(&self) {
        let mut slot = self.task.write().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let registry = self.registry.clone();
        let io = self.io.clone();
        let interval_ms = self.interval_ms;
        let shutdown = self.shutdown.clone();

        info!(interval_ms, "starting eviction task");
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = io.sleep_ms(interval_ms) => {
                        match registry.evict().await {
                            Ok(report) if !report.evicted.is_empty() => {
                                info!(
                                    evicted = report.evicted.len(),
                                    expired = report.expired_count,
                                    "eviction sweep complete"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "eviction sweep failed"),
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("eviction task shutting down");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the sweep task and wait for it to exit
    pub async fn stop(&self) {
        let Some(task) = self.task.write().await.take() else {
            return;
        };
        // notify_one stores a permit if the task is mid-sweep
        self.shutdown.notify_one();
        let _ = task.await;
        info!("eviction task stopped");
    }
}

impl<R: Registry + 'static> Drop for EvictionScheduler<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use eddy_core::{InstanceFields, InstanceInfo, Source};
    use eddy_dst::SimClock;

    #[tokio::test]
    async fn test_scheduler_evicts_on_interval() {
        let clock = SimClock::from_millis(0);
        let io = IoContext::new(Arc::new(clock.clone()));
        let config = RegistryConfig::for_testing();
        let registry = Arc::new(MemoryRegistry::new(&config, io.clone()));

        let instance = InstanceInfo::new(InstanceFields {
            id: "i-1".into(),
            app: "X".into(),
            ..Default::default()
        })
        .unwrap();
        registry
            .register(instance, &Source::local("i-1"))
            .await
            .unwrap();

        let scheduler = EvictionScheduler::new(registry.clone(), &config, io);
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        // Step through the lease duration one sweep at a time
        for _ in 0..=91 {
            tokio::task::yield_now().await;
            clock.advance_ms(config.eviction_interval_ms);
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(registry.size().await, 0);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let clock = SimClock::from_millis(0);
        let io = IoContext::new(Arc::new(clock));
        let config = RegistryConfig::for_testing();
        let registry = Arc::new(MemoryRegistry::new(&config, io.clone()));
        let scheduler = EvictionScheduler::new(registry, &config, io);
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
