// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! linkbundle - many file links in, one ZIP archive out
//!
//! Takes a list of remote file URLs (shared-drive links and the like),
//! follows at most one redirect for each, downloads what it can and streams
//! every retrieved file back as a single `files.zip`.
//!
//! **Resolve** -> **Fetch** -> **Name** -> **Archive** -> **Deliver**
//!
//! # Core Modules
//!
//! - [`download`] - Redirect resolution and bounded file fetching
//! - [`naming`] - Archive entry names from headers or URL paths
//! - [`archive`] - ZIP construction
//! - [`pipeline`] - Per-request orchestration and failure accounting
//! - [`workspace`] - Per-request scratch directories
//! - [`server`] - HTTP API
//! - [`policy`] - Request and URL validation
//! - [`audit`] - Append-only record of requested links
//! - [`config`] - Layered configuration
//! - [`errors`] - HTTP-facing error responses

pub mod archive;
pub mod audit;
pub mod config;
pub mod download;
pub mod errors;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod server;
pub mod types;
pub mod utils;
pub mod workspace;

pub use archive::{ArchiveBuilder, ArchiveError};
pub use audit::{AuditStore, JsonlAuditStore, MemoryAuditStore};
pub use config::Config;
pub use download::{FetchError, FileFetcher, RedirectResolver};
pub use errors::ApiError;
pub use naming::{NameDeriver, NameRegistry};
pub use pipeline::{Pipeline, PipelineError};
pub use server::Server;
pub use types::{DownloadRequest, FetchedPayload, PipelineOutcome, ResolvedSource};
pub use workspace::Workspace;
