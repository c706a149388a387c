// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP-facing error handling.
//!
//! Every error returned to a client is a JSON body `{ "error": ..., "reference": ... }`.
//! The message never contains internal details; those are sanitized and logged
//! together with the reference code so support can correlate the two.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::audit::AuditError;
use crate::pipeline::PipelineError;

// =============================================================================
// ERROR REFERENCE CODE GENERATION
// =============================================================================

/// Generate a unique error reference code.
/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20240115-A3F8K2)
pub fn generate_reference_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();
    let random: String = (0..6)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect();
    format!("ERR-{}-{}", date, random)
}

// =============================================================================
// USER-FACING ERROR TYPES
// =============================================================================

/// Errors that terminate a request.
///
/// Per-item fetch failures never show up here; they are recorded in the
/// pipeline outcome instead.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Malformed body, missing/empty `urls`, or a disallowed URL (400).
    InvalidRequest { message: String, reference: String },
    /// The audit store refused the URL list (500).
    AuditFailed { reference: String },
    /// Every item failed to download (500).
    AllDownloadsFailed { attempted: usize, reference: String },
    /// Writing the archive failed (500).
    ArchiveFailed { reference: String },
    /// Anything else, e.g. the workspace could not be created (500).
    Internal { reference: String },
}

/// JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reference: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::AuditFailed { .. }
            | ApiError::AllDownloadsFailed { .. }
            | ApiError::ArchiveFailed { .. }
            | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the reference code for this error.
    pub fn reference(&self) -> &str {
        match self {
            ApiError::InvalidRequest { reference, .. }
            | ApiError::AuditFailed { reference }
            | ApiError::AllDownloadsFailed { reference, .. }
            | ApiError::ArchiveFailed { reference }
            | ApiError::Internal { reference } => reference,
        }
    }

    /// Get the user-facing message.
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidRequest { message, .. } => message.clone(),
            ApiError::AuditFailed { .. } => {
                "Failed to record the request. No downloads were attempted.".to_string()
            }
            ApiError::AllDownloadsFailed { attempted, .. } => {
                format!("All downloads failed ({} attempted)", attempted)
            }
            ApiError::ArchiveFailed { .. } => "Failed to build the archive".to_string(),
            ApiError::Internal { reference } => {
                format!("An internal error occurred. Reference: {}", reference)
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.message(), self.reference())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.message(),
            reference: self.reference().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// ERROR CONSTRUCTORS (WITH LOGGING)
// =============================================================================

impl ApiError {
    /// Create an InvalidRequest error. The message is shown to the client.
    pub fn invalid_request(user_message: impl Into<String>) -> Self {
        let reference = generate_reference_code();
        let message = user_message.into();

        tracing::warn!(
            reference = %reference,
            reason = %sanitize_error_details(&message),
            "Invalid request"
        );

        Self::InvalidRequest { message, reference }
    }

    pub fn audit_failed(error: &AuditError) -> Self {
        let reference = generate_reference_code();

        tracing::error!(
            reference = %reference,
            internal_error = %sanitize_error_details(&error.to_string()),
            "Audit store rejected request"
        );

        Self::AuditFailed { reference }
    }

    pub fn all_downloads_failed(attempted: usize) -> Self {
        let reference = generate_reference_code();

        tracing::error!(
            reference = %reference,
            attempted,
            "All downloads failed"
        );

        Self::AllDownloadsFailed {
            attempted,
            reference,
        }
    }

    pub fn archive_failed(internal_error: &str) -> Self {
        let reference = generate_reference_code();

        tracing::error!(
            reference = %reference,
            internal_error = %sanitize_error_details(internal_error),
            "Archive construction failed"
        );

        Self::ArchiveFailed { reference }
    }

    /// Create an Internal error, logging full details internally.
    /// This never exposes internal details to the client.
    pub fn internal(internal_error: &str) -> Self {
        let reference = generate_reference_code();

        tracing::error!(
            reference = %reference,
            internal_error = %sanitize_error_details(internal_error),
            "Internal server error"
        );

        Self::Internal { reference }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::AllDownloadsFailed { attempted } => {
                ApiError::all_downloads_failed(attempted)
            }
            PipelineError::Archive(e) => ApiError::archive_failed(&e.to_string()),
        }
    }
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// Patterns for sanitizing sensitive information before it reaches the logs.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Query strings on URLs (shared-drive access tokens live here)
        (Regex::new(r"(https?://[^\s?#]+)\?[^\s]*").expect("URL query regex"), "$1?[QUERY_REDACTED]"),
        // Credentials embedded in URLs
        (Regex::new(r"://[^/\s:@]+:[^/\s@]+@").expect("URL userinfo regex"), "://[CREDENTIALS_REDACTED]@"),
        // File paths (Windows and Unix)
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"(?:^|\s)/(?:home|usr|var|etc|opt|tmp|root)/[^\s]+").expect("Unix path regex"), " [PATH_REDACTED]"),
        // Tokens
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex"), "Bearer [TOKEN_REDACTED]"),
        (Regex::new(r"(?i)password=[^\s;&]+").expect("Password regex"), "password=[REDACTED]"),
    ]
});

/// Sanitize error details to remove sensitive information.
///
/// Removes URL query strings, URL credentials, local file paths and tokens.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();

    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Result type that uses ApiError for the error variant.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// TESTS
// =============================================================================
