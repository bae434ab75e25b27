use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const API_KEY_ENV: &str = "EXCHANGERATESAPI_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub num_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval_secs: 30,
            num_workers: 5,
        }
    }
}

impl WorkerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests that may be sent back to back before the limit kicks in.
    pub burst: u32,
    /// One further request is allowed per window.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            burst: 1,
            window_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_base_url() -> String {
    "https://api.exchangeratesapi.io".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retries() -> usize {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

impl ProviderConfig {
    /// The credential is only needed by the worker, lookups run without it.
    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            anyhow::bail!("Provider api_key is not set (config or {API_KEY_ENV})");
        }
        Ok(&self.api_key)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Base URL the CLI uses to reach a running `serve` process.
    pub fn url(&self) -> String {
        format!("http://{}", self.listen_addr)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "fxquote", "fxquote")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "fxquote", "fxquote")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.apply_env_overrides(std::env::var(API_KEY_ENV).ok());
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    fn apply_env_overrides(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.provider.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.num_workers == 0 {
            anyhow::bail!("worker.num_workers must be at least 1");
        }
        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("worker.poll_interval_secs must be at least 1");
        }
        if self.provider.retries == 0 {
            anyhow::bail!("provider.retries must be at least 1");
        }
        if self.provider.rate_limit.burst == 0 || self.provider.rate_limit.window_secs == 0 {
            anyhow::bail!("provider.rate_limit burst and window_secs must be positive");
        }
        Ok(())
    }
}
