// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for linkbundle.
//!
//! This module provides common utility functions used across the codebase.

use rand::RngCore;

/// Maximum length of a URL preview in log lines.
const URL_PREVIEW_LENGTH: usize = 80;

/// Shorten a URL for logging.
///
/// Shared-drive links often carry access tokens in the query string, so the
/// query and fragment are dropped and the rest is truncated to a fixed width.
/// This ensures tokens are never logged in full.
///
/// # Examples
///
/// ```
/// use linkbundle::utils::url_preview;
///
/// let preview = url_preview("https://drive.example.com/file/abc?token=secret");
/// assert_eq!(preview, "https://drive.example.com/file/abc?...");
/// ```
pub fn url_preview(url: &str) -> String {
    let (base, had_query) = match url.find(['?', '#']) {
        Some(idx) => (&url[..idx], true),
        None => (url, false),
    };

    let mut preview: String = base.chars().take(URL_PREVIEW_LENGTH).collect();
    if base.chars().count() > URL_PREVIEW_LENGTH {
        preview.push_str("...");
    } else if had_query {
        preview.push_str("?...");
    }
    preview
}

/// Generate a random 128-bit request id as 32 lowercase hex characters.
pub fn request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
