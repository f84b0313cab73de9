//! Published registry

use crate::merge::{CombinedConfig, SourcedConfig};
use crate::snapshot::{RegistryRole, RegistrySnapshot};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Holds the current snapshot. Readers take an `Arc` and keep using it for
/// the rest of their request; a rebuild swaps in a new one atomically.
pub struct Registry {
    role: RegistryRole,
    current: ArcSwap<RegistrySnapshot>,
    ready: AtomicBool,
}

impl Registry {
    pub fn new(role: RegistryRole) -> Self {
        Self {
            role,
            current: ArcSwap::from_pointee(RegistrySnapshot::new(
                role,
                Default::default(),
                Vec::new(),
                0,
            )),
            ready: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> RegistryRole {
        self.role
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Replace the current snapshot. Readiness latches on once a snapshot
    /// carries descriptors from a live worker.
    pub fn publish(&self, snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let snapshot = Arc::new(snapshot);
        if snapshot.worker_descriptor_count() > 0 && !self.ready.swap(true, Ordering::AcqRel) {
            tracing::info!(
                transformers = snapshot.len(),
                "Registry ready for transform requests"
            );
        }
        self.current.store(snapshot.clone());
        snapshot
    }

    /// Merge `configs` and publish the result.
    pub fn rebuild(&self, configs: Vec<SourcedConfig>) -> Arc<RegistrySnapshot> {
        let documents = configs.len();
        let snapshot = CombinedConfig::build(configs, self.role);
        tracing::debug!(documents, transformers = snapshot.len(), "Registry rebuilt");
        self.publish(snapshot)
    }

    pub fn is_ready_for_transform_requests(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryRole::default())
    }
}
