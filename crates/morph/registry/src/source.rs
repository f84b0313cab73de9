//! Where config documents come from

use crate::config::TransformConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::merge::{ConfigOrigin, SourceTier, SourcedConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

/// Config version requested from workers.
pub const WORKER_CONFIG_VERSION: u32 = 2;

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    fn tier(&self) -> SourceTier;

    /// Read the current documents. An error leaves this source out of the
    /// rebuild; the others still apply.
    async fn fetch(&self) -> RegistryResult<Vec<SourcedConfig>>;
}

// ── Files ────────────────────────────────────────────────────────────

/// A JSON file, or every `*.json` file of a directory in name order.
pub struct FileConfigSource {
    path: PathBuf,
    tier: SourceTier,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, tier: SourceTier) -> Self {
        Self {
            path: path.into(),
            tier,
        }
    }

    async fn read(&self, path: &Path) -> RegistryResult<SourcedConfig> {
        let config = TransformConfig::load(path).await.map_err(|e| RegistryError::Source {
            origin: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(SourcedConfig::new(
            ConfigOrigin::file(self.tier, path.display().to_string()),
            config,
        ))
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        format!("{} file {}", self.tier, self.path.display())
    }

    fn tier(&self) -> SourceTier {
        self.tier
    }

    async fn fetch(&self) -> RegistryResult<Vec<SourcedConfig>> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_dir() {
            return Ok(vec![self.read(&self.path).await?]);
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            configs.push(self.read(&path).await?);
        }
        Ok(configs)
    }
}

// ── Live workers ─────────────────────────────────────────────────────

/// A worker's advertised config at `GET {base_url}/transform/config`.
pub struct WorkerConfigSource {
    base_url: String,
    client: reqwest::Client,
}

impl WorkerConfigSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ConfigSource for WorkerConfigSource {
    fn describe(&self) -> String {
        format!("worker {}", self.base_url)
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Worker
    }

    async fn fetch(&self) -> RegistryResult<Vec<SourcedConfig>> {
        let url = format!("{}/transform/config", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("configVersion", WORKER_CONFIG_VERSION)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Source {
                origin: url,
                message: format!("unexpected status {}", status),
            });
        }
        let config: TransformConfig = response.json().await?;
        Ok(vec![SourcedConfig::new(
            ConfigOrigin::worker(self.base_url.clone()),
            config,
        )])
    }
}

// ── In memory ────────────────────────────────────────────────────────

/// Documents held in memory, replaceable at runtime.
pub struct InMemoryConfigSource {
    origin: ConfigOrigin,
    config: RwLock<Option<TransformConfig>>,
}

impl InMemoryConfigSource {
    pub fn new(origin: ConfigOrigin, config: TransformConfig) -> Self {
        Self {
            origin,
            config: RwLock::new(Some(config)),
        }
    }

    pub async fn replace(&self, config: TransformConfig) {
        *self.config.write().await = Some(config);
    }

    /// Make the source unavailable, as a stopped worker would be.
    pub async fn withdraw(&self) {
        *self.config.write().await = None;
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigSource {
    fn describe(&self) -> String {
        format!("in-memory {}", self.origin.read_from)
    }

    fn tier(&self) -> SourceTier {
        self.origin.tier
    }

    async fn fetch(&self) -> RegistryResult<Vec<SourcedConfig>> {
        match self.config.read().await.as_ref() {
            Some(config) => Ok(vec![SourcedConfig::new(self.origin.clone(), config.clone())]),
            None => Err(RegistryError::Source {
                origin: self.origin.read_from.clone(),
                message: "unavailable".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformerConfig;

    const OVERRIDE: &str = r#"{"removeTransformers": ["legacy"]}"#;

    #[tokio::test]
    async fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.json");
        std::fs::write(&path, OVERRIDE).unwrap();

        let source = FileConfigSource::new(&path, SourceTier::Current);
        let configs = source.fetch().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].origin.tier, SourceTier::Current);
        assert!(configs[0].config.remove_transformers.contains("legacy"));
        assert!(source.describe().starts_with("current file"));
    }

    #[tokio::test]
    async fn test_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"removeTransformers": ["b"]}"#).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"removeTransformers": ["a"]}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let configs = FileConfigSource::new(dir.path(), SourceTier::Historic)
            .fetch()
            .await
            .unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs[0].origin.read_from.ends_with("a.json"));
        assert!(configs[1].config.remove_transformers.contains("b"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("absent.json"), SourceTier::Current);
        assert!(matches!(source.fetch().await, Err(RegistryError::Io(_))));
    }

    #[tokio::test]
    async fn test_bad_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "[").unwrap();
        let err = FileConfigSource::new(&path, SourceTier::Current)
            .fetch()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[tokio::test]
    async fn test_in_memory_replace_and_withdraw() {
        let source = InMemoryConfigSource::new(ConfigOrigin::worker("mem://w"), TransformConfig::default());
        assert!(source.fetch().await.unwrap()[0].config.transformers.is_empty());

        source
            .replace(TransformConfig {
                transformers: vec![TransformerConfig {
                    transformer_name: "A2B".into(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await;
        assert_eq!(source.fetch().await.unwrap()[0].config.transformers.len(), 1);

        source.withdraw().await;
        assert!(source.fetch().await.is_err());
    }
}
