//! Client configuration and backend factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use attain_core::traits::GradingBackend;
use attain_core::CoordinatorConfig;

use crate::http::{HttpBackend, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};

/// Top-level attain configuration.
///
/// Note: Custom Debug impl masks the token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct AttainConfig {
    /// Grading server base URL, e.g. `http://localhost:8080/api`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token. Supports `${VAR}` references.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Max concurrent students during a class-wide finalize.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl std::fmt::Debug for AttainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttainConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_parallelism() -> usize {
    4
}

impl Default for AttainConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout(),
            parallelism: default_parallelism(),
        }
    }
}

impl AttainConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            parallelism: self.parallelism.max(1),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `attain.toml` in the current directory
/// 2. `~/.config/attain/config.toml`
///
/// Environment variable overrides: `ATTAIN_BASE_URL`, `ATTAIN_TOKEN`.
pub fn load_config() -> Result<AttainConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AttainConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("attain.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<AttainConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => AttainConfig::default(),
    };

    if let Ok(url) = std::env::var("ATTAIN_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(token) = std::env::var("ATTAIN_TOKEN") {
        config.token = Some(token);
    }

    config.base_url = resolve_env_vars(&config.base_url);
    config.token = config
        .token
        .as_deref()
        .map(resolve_env_vars)
        .filter(|t| !t.is_empty());

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("attain"))
}

/// Create the HTTP backend described by the configuration.
pub fn create_backend(config: &AttainConfig) -> Result<Arc<dyn GradingBackend>> {
    let backend = HttpBackend::new(
        Some(config.base_url.clone()),
        config.token.clone(),
        Some(config.timeout_secs),
    )?;
    Ok(Arc::new(backend))
}
