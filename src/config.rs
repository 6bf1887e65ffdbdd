use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub mal: MalConfig,

    pub matching: MatchingConfig,

    pub scrape: ScrapeConfig,

    pub archival: ArchivalConfig,

    pub proxy: ProxyConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "weaboo".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    /// 0 lets tokio pick.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    /// Overall request budget in seconds; must absorb a cold enrichment.
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7860,
            request_timeout_seconds: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/weaboo.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MalConfig {
    /// Minimum gap between Jikan requests in milliseconds.
    pub throttle_ms: u64,
}

impl Default for MalConfig {
    fn default() -> Self {
        Self { throttle_ms: 400 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Hamming distance below which two poster hashes are the same image.
    pub phash_threshold: i32,

    pub similarity_threshold: f64,

    /// Allowed episode-count skew between provider and MAL.
    pub episode_tolerance: i32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            phash_threshold: 5,
            similarity_threshold: 0.85,
            episode_tolerance: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub cache_ttl_minutes: u64,

    pub request_timeout_seconds: u64,

    pub resolver_timeout_seconds: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 20,
            request_timeout_seconds: 30,
            resolver_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAccountConfig {
    pub owner: String,

    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    /// Base URL of the archival worker, for the enqueue webhook.
    pub worker_base_url: String,

    /// Base URL of the API process, for the post-commit cache
    /// invalidation ping.
    pub api_base_url: String,

    pub worker_port: u16,

    /// Shared secret: file-key derivation and webhook auth use the same
    /// value, so a mismatch fails both.
    pub salt: String,

    /// Durable-storage accounts, first successful upload becomes primary.
    #[serde(default)]
    pub storage: Vec<StorageAccountConfig>,

    /// Top-level folder prefix inside each storage repo.
    pub namespace: String,

    pub poll_interval_seconds: u64,

    pub claim_batch: u64,

    pub max_concurrent_jobs: usize,

    /// Jobs stuck in-flight longer than this are reset on startup.
    pub stale_after_minutes: i64,

    /// Minimum free space on the scratch volume before accepting a job.
    pub min_free_disk_gb: f64,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            worker_base_url: "http://localhost:7861".to_string(),
            api_base_url: "http://localhost:7860".to_string(),
            worker_port: 7861,
            salt: "weaboo-default-salt".to_string(),
            storage: Vec::new(),
            namespace: "weaboo".to_string(),
            poll_interval_seconds: 10,
            claim_batch: 2,
            max_concurrent_jobs: 2,
            stale_after_minutes: 120,
            min_free_disk_gb: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL clients use to reach the proxy; stream URLs are built on it.
    pub base_url: String,

    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7862".to_string(),
            port: 7862,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            mal: MalConfig::default(),
            matching: MatchingConfig::default(),
            scrape: ScrapeConfig::default(),
            archival: ArchivalConfig::default(),
            proxy: ProxyConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Deployment-sensitive values come from the environment when present.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var("WORKER_BASE_URL") {
            self.archival.worker_base_url = url;
        }
        if let Ok(url) = std::env::var("API_BASE_URL") {
            self.archival.api_base_url = url;
        }
        if let Ok(url) = std::env::var("PROXY_BASE_URL") {
            self.proxy.base_url = url;
        }
        if let Ok(salt) = std::env::var("FILE_SALT") {
            self.archival.salt = salt;
        }

        for index in 1..=5u8 {
            let token = std::env::var(format!("STORAGE_TOKEN_{index}")).unwrap_or_default();
            let owner = std::env::var(format!("STORAGE_OWNER_{index}")).unwrap_or_default();
            if !token.is_empty() && !owner.is_empty() {
                self.archival.storage.push(StorageAccountConfig { owner, token });
            }
        }
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("weaboo").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".weaboo").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.archival.salt.is_empty() {
            anyhow::bail!("Archival salt cannot be empty");
        }

        if !(0.0..=1.0).contains(&self.matching.similarity_threshold) {
            anyhow::bail!("Similarity threshold must be within [0, 1]");
        }

        if self.matching.phash_threshold <= 0 {
            anyhow::bail!("pHash threshold must be positive");
        }

        if self.archival.claim_batch == 0 || self.archival.max_concurrent_jobs == 0 {
            anyhow::bail!("Archival worker batch and concurrency must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mal.throttle_ms, 400);
        assert_eq!(config.matching.phash_threshold, 5);
        assert_eq!(config.scrape.cache_ttl_minutes, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization_partial() {
        let toml_str = r#"
            [server]
            port = 9000

            [matching]
            episode_tolerance = 3
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.matching.episode_tolerance, 3);

        assert_eq!(config.archival.poll_interval_seconds, 10);
    }

    #[test]
    fn test_validate_rejects_empty_salt() {
        let mut config = Config::default();
        config.archival.salt = String::new();
        assert!(config.validate().is_err());
    }
}
