use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Storage budget and chunking parameters (`[storage]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Quota reported when the backing store has no quota of its own.
    pub quota_bytes: u64,
    /// Reserve kept free so concurrent writers don't race past the quota.
    pub safety_buffer_bytes: u64,
    /// Payloads up to this size are stored as a single data-URL entry.
    pub direct_threshold_bytes: u64,
    /// Raw bytes per chunk for larger payloads.
    pub chunk_size_bytes: u64,
    /// Name substrings that get priority in batch saves.
    pub important_patterns: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 5 * 1024 * 1024,
            safety_buffer_bytes: 512 * 1024,
            direct_threshold_bytes: 1024 * 1024,
            chunk_size_bytes: 1024 * 1024,
            important_patterns: [
                "chunk-", "vendor", "polyfill", "runtime", "main", "app", "index", "bundle",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Live-reload reconnect parameters (`[live_reload]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Reconnect attempts before the subscription gives up.
    pub max_retries: u32,
    /// Fixed delay between reconnect attempts, in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_interval_ms: 5000,
        }
    }
}

impl LiveReloadConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Injection parameters (`[inject]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectConfig {
    /// Name of the page capability whose `install` hook receives freshly loaded modules.
    pub capability_name: String,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            capability_name: "vue".to_string(),
        }
    }
}

/// Global configuration loaded from `~/.config/resub/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResubConfig {
    /// How long page init waits for the enable decision before giving up (ms).
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub live_reload: LiveReloadConfig,
    #[serde(default)]
    pub inject: InjectConfig,
}

fn default_init_timeout_ms() -> u64 {
    5000
}

impl Default for ResubConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout_ms(),
            storage: StorageConfig::default(),
            live_reload: LiveReloadConfig::default(),
            inject: InjectConfig::default(),
        }
    }
}

impl ResubConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("resub")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ResubConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ResubConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ResubConfig = toml::from_str(&data)?;
    Ok(cfg)
}
