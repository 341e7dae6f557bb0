use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{Budgets, ClassifierConfig, StandardPolicy};
use crate::transport::TransportSettings;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "ZYTE_API_KEY";

/// Named retry policy preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    #[default]
    Default,
    /// Every bounded budget doubled.
    Aggressive,
}

/// Retry policy parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: PolicyPreset,
    /// When false, only rate limiting is retried.
    pub retry_errors: bool,
    /// Overrides for the preset's budgets.
    pub download_errors: Option<u32>,
    pub permanent_download_errors: Option<u32>,
    pub server_errors: Option<u32>,
    pub network_window_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: PolicyPreset::Default,
            retry_errors: true,
            download_errors: None,
            permanent_download_errors: None,
            server_errors: None,
            network_window_secs: None,
        }
    }
}

impl RetryConfig {
    /// Preset budgets with the overrides applied.
    pub fn budgets(&self) -> Budgets {
        let base = match self.policy {
            PolicyPreset::Default => Budgets::default(),
            PolicyPreset::Aggressive => Budgets::default().doubled(),
        };
        Budgets {
            download_errors: self.download_errors.unwrap_or(base.download_errors),
            permanent_download_errors: self
                .permanent_download_errors
                .unwrap_or(base.permanent_download_errors),
            server_errors: self.server_errors.unwrap_or(base.server_errors),
            network_window: self
                .network_window_secs
                .map(Duration::from_secs)
                .unwrap_or(base.network_window),
        }
    }
}

/// Global configuration loaded from `~/.config/zapi/config.toml`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZapiConfig {
    /// Base API URL; the endpoint is joined onto it.
    pub api_url: String,
    pub endpoint: String,
    /// Maximum concurrent exchanges per session.
    pub n_conn: usize,
    /// Total time allowed for one exchange, in seconds.
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub retry: RetryConfig,
    /// Status codes and error types per failure kind.
    pub classify: ClassifierConfig,
}

impl Default for ZapiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.zyte.com/v1/".to_string(),
            endpoint: "extract".to_string(),
            n_conn: 15,
            // Server-side timeout is 200 s; leave headroom for queueing.
            timeout_secs: 320,
            api_key: None,
            retry: RetryConfig::default(),
            classify: ClassifierConfig::default(),
        }
    }
}

impl fmt::Debug for ZapiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZapiConfig")
            .field("api_url", &self.api_url)
            .field("endpoint", &self.endpoint)
            .field("n_conn", &self.n_conn)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("retry", &self.retry)
            .field("classify", &self.classify)
            .finish()
    }
}

/// No API key was given, configured or found in the environment.
#[derive(Debug, thiserror::Error)]
#[error("no API key: pass --api-key, set api_key in config.toml or export ZYTE_API_KEY")]
pub struct NoApiKey;

impl ZapiConfig {
    /// Rejects settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.n_conn == 0 {
            bail!("n_conn must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Retry policy described by `[retry]` and `[classify]`.
    pub fn policy(&self) -> StandardPolicy {
        StandardPolicy {
            retry_errors: self.retry.retry_errors,
            ..StandardPolicy::default()
        }
        .with_budgets(self.retry.budgets())
        .with_classifier(self.classify.clone())
    }

    /// Picks the API key: `explicit`, then the config file, then the environment.
    pub fn resolve_api_key(&self, explicit: Option<&str>) -> Result<String, NoApiKey> {
        pick_api_key(
            explicit,
            self.api_key.as_deref(),
            std::env::var(API_KEY_ENV).ok().as_deref(),
        )
    }

    pub fn transport_settings(&self, api_key: String) -> TransportSettings {
        TransportSettings {
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            pool_size: self.n_conn.max(1),
            ..TransportSettings::new(self.api_url.clone(), api_key)
        }
    }
}

fn pick_api_key(
    explicit: Option<&str>,
    configured: Option<&str>,
    env: Option<&str>,
) -> Result<String, NoApiKey> {
    [explicit, configured, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(NoApiKey)
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("zapi")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ZapiConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<ZapiConfig> {
    if !path.exists() {
        let default_cfg = ZapiConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: ZapiConfig = toml::from_str(&data)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
