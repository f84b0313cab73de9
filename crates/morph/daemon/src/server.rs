//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use morph_registry::{
    ConfigSource, FileConfigSource, Registry, RegistryPoller, SourceTier, WorkerConfigSource,
};
use morph_router::{HttpWorkerClient, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Morph Daemon Server
pub struct Server {
    config: DaemonConfig,
    registry: Arc<Registry>,
    poller: RegistryPoller,
    router: Arc<Router>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let registry = Arc::new(Registry::new(config.registry.role));
        let sources = Self::sources(&config)?;
        tracing::info!(
            role = ?config.registry.role,
            workers = config.registry.worker_urls.len(),
            sources = sources.len(),
            "Config sources assembled"
        );

        let poller = RegistryPoller::new(
            registry.clone(),
            sources,
            config.registry.poll_interval(),
        );
        let router = Arc::new(Router::new(
            registry.clone(),
            Arc::new(HttpWorkerClient::new()),
            config.router_config(),
        ));

        Ok(Self {
            config,
            registry,
            poller,
            router,
        })
    }

    /// Workers first, then the historic and current override files.
    fn sources(config: &DaemonConfig) -> DaemonResult<Vec<Arc<dyn ConfigSource>>> {
        let mut sources: Vec<Arc<dyn ConfigSource>> = Vec::new();
        for url in &config.registry.worker_urls {
            let source = WorkerConfigSource::new(url, config.registry.worker_timeout())?;
            sources.push(Arc::new(source));
        }
        if let Some(path) = &config.registry.historic_path {
            sources.push(Arc::new(FileConfigSource::new(path, SourceTier::Historic)));
        }
        if let Some(path) = &config.registry.current_path {
            sources.push(Arc::new(FileConfigSource::new(path, SourceTier::Current)));
        }
        if sources.is_empty() {
            return Err(DaemonError::Config(
                "no worker URLs or override files configured".to_string(),
            ));
        }
        Ok(sources)
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(
            self.registry.clone(),
            self.router.clone(),
            self.poller.refresh_handle(),
        );
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Morph daemon listening on {}", addr);

        // The first tick polls immediately.
        let poller = self.poller.spawn(shutdown_rx);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Morph daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "Registry poller ended abnormally");
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
