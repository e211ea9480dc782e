//! Application grouping and reconcile hash code
//!
//! TigerStyle: Derived state only. `Applications` is patched from change
//! notifications, never written directly by callers.

use crate::instance::{InstanceInfo, InstanceStatus};
use crate::notification::ChangeNotification;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// =============================================================================
// Application
// =============================================================================

/// All instances of one application, in insertion order
#[derive(Debug, Clone, Default)]
pub struct Application {
    name: String,
    order: Vec<String>,
    instances: HashMap<String, Arc<InstanceInfo>>,
}

impl Application {
    /// Create an empty application
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: Vec::new(),
            instances: HashMap::new(),
        }
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace an instance, keeping its original position
    pub fn upsert(&mut self, instance: Arc<InstanceInfo>) {
        let key = instance.id.as_str().to_string();
        if self.instances.insert(key.clone(), instance).is_none() {
            self.order.push(key);
        }
        debug_assert_eq!(self.order.len(), self.instances.len());
    }

    /// Remove an instance by id
    pub fn remove(&mut self, id: &str) -> Option<Arc<InstanceInfo>> {
        let removed = self.instances.remove(id)?;
        self.order.retain(|key| key != id);
        debug_assert_eq!(self.order.len(), self.instances.len());
        Some(removed)
    }

    /// Look up an instance by id
    pub fn get(&self, id: &str) -> Option<&Arc<InstanceInfo>> {
        self.instances.get(id)
    }

    /// Instances in insertion order
    pub fn instances(&self) -> impl Iterator<Item = &Arc<InstanceInfo>> {
        self.order.iter().filter_map(|key| self.instances.get(key))
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the application has no instances
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

// =============================================================================
// Applications
// =============================================================================

/// Every application known to a registry view
#[derive(Debug, Clone, Default)]
pub struct Applications {
    apps: BTreeMap<String, Application>,
    version: u64,
}

/// Serializable summary of an [`Applications`] view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationsSummary {
    pub version: u64,
    pub reconcile_hash_code: String,
    pub applications: BTreeMap<String, Vec<InstanceInfo>>,
}

impl Applications {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a view from a snapshot of instances
    pub fn from_instances(instances: impl IntoIterator<Item = Arc<InstanceInfo>>) -> Self {
        let mut apps = Self::new();
        for instance in instances {
            apps.upsert(instance);
        }
        apps
    }

    /// Monotonic version, bumped on every applied change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply one change notification
    ///
    /// Returns `true` if the view changed.
    pub fn apply(&mut self, notification: &ChangeNotification) -> bool {
        match notification {
            ChangeNotification::Add(instance) | ChangeNotification::Modify { instance, .. } => {
                self.upsert(instance.clone());
                true
            }
            ChangeNotification::Delete(instance) => {
                self.remove(&instance.app, instance.id.as_str()).is_some()
            }
            ChangeNotification::StreamState(_) => false,
        }
    }

    fn upsert(&mut self, instance: Arc<InstanceInfo>) {
        // An update may move an instance between applications
        let moved_from = self
            .apps
            .iter()
            .find(|(name, app)| **name != instance.app && app.get(instance.id.as_str()).is_some())
            .map(|(name, _)| name.clone());
        if let Some(previous) = moved_from {
            self.remove(&previous, instance.id.as_str());
        }

        self.apps
            .entry(instance.app.clone())
            .or_insert_with(|| Application::new(instance.app.clone()))
            .upsert(instance);
        self.version = self.version.saturating_add(1);
    }

    fn remove(&mut self, app: &str, id: &str) -> Option<Arc<InstanceInfo>> {
        let application = self.apps.get_mut(app)?;
        let removed = application.remove(id)?;
        if application.is_empty() {
            self.apps.remove(app);
        }
        self.version = self.version.saturating_add(1);
        Some(removed)
    }

    /// Look up one application
    pub fn application(&self, name: &str) -> Option<&Application> {
        self.apps.get(name)
    }

    /// All applications ordered by name
    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.apps.values()
    }

    /// Total number of instances
    pub fn instance_count(&self) -> usize {
        self.apps.values().map(Application::len).sum()
    }

    /// Count of instances per effective status
    pub fn status_counts(&self) -> BTreeMap<InstanceStatus, usize> {
        let mut counts = BTreeMap::new();
        for instance in self.apps.values().flat_map(Application::instances) {
            *counts.entry(instance.effective_status()).or_insert(0) += 1;
        }
        counts
    }

    /// Deterministic digest of the status multiset, e.g. `"DOWN_2_UP_5_"`
    ///
    /// Statuses appear in alphabetical order; statuses with no instances are
    /// omitted, so an empty view yields `""`.
    pub fn reconcile_hash_code(&self) -> String {
        self.status_counts()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(status, count)| format!("{}_{}_", status, count))
            .collect()
    }

    /// Serializable summary of the view
    pub fn summary(&self) -> ApplicationsSummary {
        ApplicationsSummary {
            version: self.version,
            reconcile_hash_code: self.reconcile_hash_code(),
            applications: self
                .apps
                .iter()
                .map(|(name, app)| {
                    (
                        name.clone(),
                        app.instances().map(|i| i.as_ref().clone()).collect(),
                    )
                })
                .collect(),
        }
    }
}
