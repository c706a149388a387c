// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded download of a resolved URL.

use std::time::Duration;

use reqwest::Client;

use super::FetchError;
use crate::types::FetchedPayload;

#[derive(Debug, Clone)]
pub struct FileFetcher {
    client: Client,
    /// Applies from connect until the body has been read.
    timeout: Duration,
    max_bytes: u64,
}

impl FileFetcher {
    /// `client` must have automatic redirects disabled.
    pub fn new(client: Client, timeout: Duration, max_bytes: u64) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Download `url`, which sits at position `index` in the request.
    ///
    /// Only 2xx responses succeed. A redirect at this point is a second hop
    /// and counts as a failure.
    pub async fn fetch(&self, url: &str, index: usize) -> Result<FetchedPayload, FetchError> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        let headers = response.headers().clone();
        let mut bytes = Vec::with_capacity(
            response
                .content_length()
                .map(|len| len as usize)
                .unwrap_or_default(),
        );

        while let Some(chunk) = response.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedPayload {
            bytes,
            headers,
            source_index: index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> FileFetcher {
        let client = crate::download::build_client(Duration::from_millis(200)).unwrap();
        FileFetcher::new(client, Duration::from_millis(500), 1024)
    }

    #[tokio::test]
    async fn test_invalid_url_fails() {
        let err = fetcher().fetch("not a url", 0).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_fails() {
        let err = fetcher().fetch("http://127.0.0.1:9/file", 0).await.unwrap_err();
        assert!(
            matches!(err, FetchError::Network(_) | FetchError::Timeout),
            "got {err:?}"
        );
    }
}
