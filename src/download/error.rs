// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

/// Why a single URL could not be downloaded.
///
/// These never abort a batch; the pipeline records them and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("request deadline exceeded before the download finished")]
    DeadlineExceeded,
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if error.is_builder() {
            FetchError::InvalidUrl(error.to_string())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}
