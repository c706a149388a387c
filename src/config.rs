// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Service configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables. The binary applies CLI flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Token-bucket settings for the per-IP rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds between token refills.
    pub per_second: u64,
    /// Bucket size.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // 1 request per second = 60 per minute
        Self {
            per_second: 1,
            burst: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// Address to bind to (defaults to 127.0.0.1 for security).
    pub bind_address: String,
    /// CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Hosts source URLs may point at; empty allows any http(s) host.
    /// A leading dot (".example.com") also admits subdomains.
    pub allowed_hosts: Vec<String>,
    pub max_urls: usize,
    pub fetch_timeout_secs: u64,
    /// End-to-end budget for the fetch phase of one request.
    pub request_timeout_secs: u64,
    pub max_file_bytes: u64,
    /// How many URLs may be resolved and fetched at once. 1 is sequential.
    pub fetch_concurrency: usize,
    /// Extension given to entries with no extension or a generic one.
    pub default_extension: String,
    /// Root for per-request workspaces; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub audit_enabled: bool,
    /// Audit log file; `~/.linkbundle/audit.jsonl` when unset.
    pub audit_log_path: Option<PathBuf>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "127.0.0.1".to_string(),
            allowed_origins: Vec::new(),
            allowed_hosts: Vec::new(),
            max_urls: 100,
            fetch_timeout_secs: 10,
            request_timeout_secs: 120,
            max_file_bytes: 100 * 1024 * 1024,
            fetch_concurrency: 1,
            default_extension: "pdf".to_string(),
            scratch_dir: None,
            audit_enabled: true,
            audit_log_path: None,
            rate_limit: Some(RateLimitConfig::default()),
        }
    }
}

impl Config {
    /// Directory holding the default config and audit files (~/.linkbundle).
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".linkbundle")
    }

    /// Load defaults, then `path` (or the default config file if it exists),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::config_dir().join("config.json");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LINKBUNDLE_PORT").or_else(|| lookup("PORT")) {
            self.port = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "LINKBUNDLE_PORT",
                value,
            })?;
        }
        if let Some(value) = lookup("LINKBUNDLE_BIND") {
            self.bind_address = value.trim().to_string();
        }
        if let Some(value) = lookup("LINKBUNDLE_ALLOWED_ORIGINS") {
            self.allowed_origins = split_list(&value);
        }
        if let Some(value) = lookup("LINKBUNDLE_ALLOWED_HOSTS") {
            self.allowed_hosts = split_list(&value);
        }
        if let Some(value) = lookup("LINKBUNDLE_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("LINKBUNDLE_AUDIT_LOG") {
            self.audit_log_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("LINKBUNDLE_RATE_LIMIT_PER_SECOND") {
            let per_second = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "LINKBUNDLE_RATE_LIMIT_PER_SECOND",
                value,
            })?;
            let mut limit = self.rate_limit.unwrap_or_default();
            limit.per_second = per_second;
            self.rate_limit = Some(limit);
        }
        if let Some(value) = lookup("LINKBUNDLE_RATE_LIMIT_BURST") {
            let burst = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "LINKBUNDLE_RATE_LIMIT_BURST",
                value,
            })?;
            let mut limit = self.rate_limit.unwrap_or_default();
            limit.burst = burst;
            self.rate_limit = Some(limit);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_urls == 0 {
            return Err(ConfigError::Invalid("max_urls must be at least 1".into()));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch_concurrency must be at least 1".into(),
            ));
        }
        if self.fetch_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        let ext = self.default_extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "default_extension {:?} is not a usable extension",
                self.default_extension
            )));
        }
        if let Some(limit) = self.rate_limit {
            if limit.per_second == 0 || limit.burst == 0 {
                return Err(ConfigError::Invalid(
                    "rate_limit values must be non-zero".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("audit.jsonl"))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
