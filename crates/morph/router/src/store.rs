//! Releasing artifacts a plan no longer needs

use async_trait::async_trait;
use std::sync::Mutex;

/// Content store holding sources, intermediates and results.
///
/// The router only ever releases references; workers read and write the
/// content themselves.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn release(&self, reference: &str);
}

/// Store for deployments where artifacts expire on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArtifactStore;

#[async_trait]
impl ArtifactStore for NoopArtifactStore {
    async fn release(&self, reference: &str) {
        tracing::trace!(reference, "Artifact release skipped");
    }
}

/// Remembers every release, in order.
#[derive(Debug, Default)]
pub struct RecordingArtifactStore {
    released: Mutex<Vec<String>>,
}

impl RecordingArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn released(&self) -> Vec<String> {
        self.released
            .lock()
            .map(|released| released.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for RecordingArtifactStore {
    async fn release(&self, reference: &str) {
        if let Ok(mut released) = self.released.lock() {
            released.push(reference.to_string());
        }
    }
}
