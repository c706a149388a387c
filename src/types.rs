// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across linkbundle.
//!
//! Everything here is request-scoped: nothing outlives a single call to the
//! pipeline.

use std::path::PathBuf;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

/// Body of `POST /download-zip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URLs in the order their entries should appear in the archive.
    pub urls: Vec<String>,
}

/// A URL after at most one redirect hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub original_url: String,
    pub final_url: String,
}

impl ResolvedSource {
    /// A source that did not redirect.
    pub fn unchanged(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            original_url: url.clone(),
            final_url: url,
        }
    }

    /// Whether a redirect hop changed the URL.
    pub fn was_redirected(&self) -> bool {
        self.original_url != self.final_url
    }
}

/// Bytes and headers of one successfully fetched URL.
#[derive(Debug)]
pub struct FetchedPayload {
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
    /// Position of the source URL in the request.
    pub source_index: usize,
}

/// Why a single item was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub index: usize,
    pub url: String,
    pub reason: String,
}

/// Result of running the pipeline over one request.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Number of URLs in the request.
    pub attempted: usize,
    /// Number of entries written to the archive.
    pub succeeded: usize,
    /// Skipped items, in input order.
    pub failures: Vec<ItemFailure>,
    /// Finalized archive; present only when `succeeded >= 1`.
    pub archive_path: Option<PathBuf>,
}

impl PipelineOutcome {
    /// True when some but not all items were archived.
    pub fn is_partial(&self) -> bool {
        self.succeeded > 0 && self.succeeded < self.attempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_source_unchanged() {
        let source = ResolvedSource::unchanged("https://host/a");
        assert_eq!(source.final_url, "https://host/a");
        assert!(!source.was_redirected());
    }

    #[test]
    fn test_outcome_partial() {
        let outcome = PipelineOutcome {
            attempted: 3,
            succeeded: 2,
            failures: Vec::new(),
            archive_path: None,
        };
        assert!(outcome.is_partial());

        let full = PipelineOutcome {
            succeeded: 3,
            ..outcome
        };
        assert!(!full.is_partial());
    }

    #[test]
    fn test_download_request_deserialize() {
        let req: DownloadRequest =
            serde_json::from_str(r#"{"urls":["https://a/1","https://a/2"]}"#).unwrap();
        assert_eq!(req.urls.len(), 2);
        assert_eq!(req.urls[1], "https://a/2");
    }
}
