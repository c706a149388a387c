// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote file retrieval.
//!
//! Two steps per URL:
//! - [`RedirectResolver`] follows at most one redirect hop and never fails
//! - [`FileFetcher`] downloads the resolved URL with a timeout and size cap
//!
//! Both share one `reqwest` client with automatic redirects disabled, so a
//! second hop surfaces as a non-success status in the fetch step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ RedirectResolver│────▶│ FileFetcher     │────▶ FetchedPayload
//! │ (one hop)       │     │ (timeout, cap)  │
//! └─────────────────┘     └─────────────────┘
//! ```

pub mod error;
pub mod fetcher;
pub mod resolver;

pub use error::FetchError;
pub use fetcher::FileFetcher;
pub use resolver::RedirectResolver;

use std::time::Duration;

/// User agent sent with every upstream request.
pub const USER_AGENT: &str = concat!("linkbundle/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the resolver and the fetcher.
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .user_agent(USER_AGENT)
        .build()
}
