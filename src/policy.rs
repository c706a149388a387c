// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request validation: body shape and accepted URLs.
//!
//! Everything here runs before any side effect, so a rejected request never
//! touches the audit store, the filesystem or the network.

use reqwest::Url;
use serde_json::Value;

use crate::config::Config;
use crate::types::DownloadRequest;

/// Which URLs a request may contain.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Lowercased host names; a leading dot admits subdomains.
    allowed_hosts: Vec<String>,
    max_urls: usize,
}

impl UrlPolicy {
    pub fn new(allowed_hosts: &[String], max_urls: usize) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            max_urls,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.allowed_hosts, config.max_urls)
    }

    /// Check a single URL, returning the reason it is refused.
    pub fn check_url(&self, raw: &str) -> Result<(), String> {
        let url = Url::parse(raw).map_err(|e| format!("not a valid URL ({})", e))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("scheme '{}' is not allowed", other)),
        }

        let host = url.host_str().ok_or_else(|| "URL has no host".to_string())?;
        if self.allowed_hosts.is_empty() || self.host_allowed(host) {
            Ok(())
        } else {
            Err(format!("host '{}' is not allowed", host))
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| match allowed.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(allowed.as_str()),
            None => host == *allowed,
        })
    }

    /// Validate a raw JSON body into a [`DownloadRequest`].
    ///
    /// `urls` must be present, an array, non-empty, no longer than the
    /// configured limit, and contain only accepted URL strings.
    pub fn validate(&self, body: &Value) -> Result<DownloadRequest, String> {
        let urls = body
            .get("urls")
            .ok_or_else(|| "Invalid request: missing 'urls'".to_string())?
            .as_array()
            .ok_or_else(|| "Invalid request: 'urls' must be an array".to_string())?;

        if urls.is_empty() {
            return Err("Invalid request: 'urls' must not be empty".to_string());
        }
        if urls.len() > self.max_urls {
            return Err(format!(
                "Invalid request: too many URLs ({} given, max {})",
                urls.len(),
                self.max_urls
            ));
        }

        let urls = urls
            .iter()
            .enumerate()
            .map(|(i, value)| -> Result<String, String> {
                let url = value
                    .as_str()
                    .ok_or_else(|| format!("Invalid request: urls[{}] must be a string", i))?;
                self.check_url(url)
                    .map_err(|reason| format!("Invalid request: urls[{}] {}", i, reason))?;
                Ok(url.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DownloadRequest { urls })
    }
}
