//! Configuration for morphd

use morph_registry::RegistryRole;
use morph_router::{RetryPolicy, RouterConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Where capability configs come from
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Retry and dispatch settings
    #[serde(default)]
    pub router: RoutingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Registry sources and polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub role: RegistryRole,

    /// Seconds between rebuilds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Base URLs of the workers whose `/transform/config` is polled
    #[serde(default)]
    pub worker_urls: Vec<String>,

    /// Timeout for one worker config fetch, in seconds
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,

    /// Override file merged over worker configs
    #[serde(default)]
    pub historic_path: Option<PathBuf>,

    /// Override file merged over everything else
    #[serde(default)]
    pub current_path: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            role: RegistryRole::default(),
            poll_interval_secs: default_poll_interval(),
            worker_urls: Vec::new(),
            worker_timeout_secs: default_worker_timeout(),
            historic_path: None,
            current_path: None,
        }
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

/// Retry and dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Retries of one step after a transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// How long one worker gets to answer one hop
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            dispatch_timeout_ms: default_dispatch_timeout(),
        }
    }
}

impl From<&RoutingConfig> for RouterConfig {
    fn from(config: &RoutingConfig) -> Self {
        RouterConfig {
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base_ms: config.backoff_base_ms,
                backoff_max_ms: config.backoff_max_ms,
            },
            dispatch_timeout_ms: config.dispatch_timeout_ms,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_poll_interval() -> u64 {
    30
}

fn default_worker_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}

fn default_backoff_base() -> u64 {
    RetryPolicy::default().backoff_base_ms
}

fn default_backoff_max() -> u64 {
    RetryPolicy::default().backoff_max_ms
}

fn default_dispatch_timeout() -> u64 {
    RouterConfig::default().dispatch_timeout_ms
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `MORPH_`-prefixed environment variables (`MORPH_REGISTRY__POLL_INTERVAL_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MORPH")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("registry.worker_urls")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::from(&self.router)
    }
}
