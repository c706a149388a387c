// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Single-hop redirect resolution.

use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Client, Url};

use crate::types::ResolvedSource;
use crate::utils::url_preview;

/// Resolves a URL through at most one redirect.
///
/// Resolution is total: any failure yields the original URL, and the fetch
/// step is what reports a broken link.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    client: Client,
    timeout: Duration,
}

impl RedirectResolver {
    /// `client` must have automatic redirects disabled.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn resolve(&self, url: &str) -> ResolvedSource {
        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url_preview(url), error = %e, "Redirect probe failed, using original URL");
                return ResolvedSource::unchanged(url);
            }
        };

        if !response.status().is_redirection() {
            return ResolvedSource::unchanged(url);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match location {
            Some(location) => {
                let final_url = join_location(url, location);
                tracing::debug!(
                    from = %url_preview(url),
                    to = %url_preview(&final_url),
                    "Resolved redirect"
                );
                ResolvedSource {
                    original_url: url.to_string(),
                    final_url,
                }
            }
            None => {
                tracing::debug!(url = %url_preview(url), status = %response.status(), "Redirect without Location");
                ResolvedSource::unchanged(url)
            }
        }
    }
}

/// Resolve a possibly relative `Location` against the URL that returned it.
///
/// The location is not validated: if it cannot be joined it is returned
/// verbatim and the fetch step reports the problem.
fn join_location(base: &str, location: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(location))
        .map(String::from)
        .unwrap_or_else(|_| location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_absolute_location() {
        assert_eq!(
            join_location("https://a.com/x", "https://b.com/file.pdf"),
            "https://b.com/file.pdf"
        );
    }

    #[test]
    fn test_join_relative_location() {
        assert_eq!(
            join_location("https://a.com/dir/x?id=1", "/files/y"),
            "https://a.com/files/y"
        );
        assert_eq!(
            join_location("https://a.com/dir/x", "y.pdf"),
            "https://a.com/dir/y.pdf"
        );
    }

    #[test]
    fn test_join_with_unparsable_base_keeps_location() {
        assert_eq!(join_location("not a url", "/files/y"), "/files/y");
    }

    #[tokio::test]
    async fn test_unreachable_host_returns_original() {
        let client = crate::download::build_client(Duration::from_millis(200)).unwrap();
        let resolver = RedirectResolver::new(client, Duration::from_millis(500));
        // Port 9 (discard) on localhost is closed in test environments.
        let source = resolver.resolve("http://127.0.0.1:9/file").await;
        assert_eq!(source, ResolvedSource::unchanged("http://127.0.0.1:9/file"));
    }

    #[tokio::test]
    async fn test_malformed_url_returns_original() {
        let client = crate::download::build_client(Duration::from_millis(200)).unwrap();
        let resolver = RedirectResolver::new(client, Duration::from_millis(500));
        let source = resolver.resolve("::not-a-url::").await;
        assert_eq!(source.final_url, "::not-a-url::");
    }
}
