//! Background rebuild loop

use crate::registry::Registry;
use crate::snapshot::RegistrySnapshot;
use crate::source::ConfigSource;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Polls every source on a fixed interval and publishes a new snapshot.
/// The only writer of the registry.
pub struct RegistryPoller {
    registry: Arc<Registry>,
    sources: Vec<Arc<dyn ConfigSource>>,
    poll_interval: Duration,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: Option<mpsc::Receiver<()>>,
}

impl RegistryPoller {
    pub fn new(registry: Arc<Registry>, sources: Vec<Arc<dyn ConfigSource>>, poll_interval: Duration) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(4);
        Self {
            registry,
            sources,
            poll_interval,
            refresh_tx,
            refresh_rx: Some(refresh_rx),
        }
    }

    /// Handle for requesting an immediate rebuild.
    pub fn refresh_handle(&self) -> mpsc::Sender<()> {
        self.refresh_tx.clone()
    }

    /// Fetch from every source concurrently and publish what came back.
    pub async fn poll_once(&self) -> Arc<RegistrySnapshot> {
        let results = join_all(self.sources.iter().map(|s| s.fetch())).await;

        let mut configs = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(mut fetched) => configs.append(&mut fetched),
                Err(e) => {
                    tracing::warn!(source = %source.describe(), error = %e, "Config source unavailable");
                }
            }
        }
        self.registry.rebuild(configs)
    }

    /// Poll until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_rx = self.refresh_rx.take();

        tracing::info!(
            sources = self.sources.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Registry poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                Some(_) = recv(&mut refresh_rx) => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Registry poller stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn recv(rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
