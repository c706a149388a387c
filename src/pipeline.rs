// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fetch → name → archive orchestration.
//!
//! For each URL, in request order: resolve one redirect hop, download, derive
//! an entry name, append to the archive. A failed item is logged, recorded
//! and skipped. Archive write errors abort the whole run.
//!
//! Resolve+fetch may run for several URLs at once (`fetch_concurrency`), but
//! results are consumed in input order and appended one at a time, so entry
//! order always matches the request. The fetch timeout is a per-item budget
//! shared by the redirect probe and the download.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::archive::{run_blocking, ArchiveBuilder, ArchiveError};
use crate::config::Config;
use crate::download::{build_client, FetchError, FileFetcher, RedirectResolver};
use crate::naming::{NameDeriver, NameRegistry};
use crate::types::{FetchedPayload, ItemFailure, PipelineOutcome, ResolvedSource};
use crate::utils::url_preview;
use crate::workspace::Workspace;

/// Failures that end a run without an archive.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("all {attempted} downloads failed")]
    AllDownloadsFailed { attempted: usize },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    resolver: RedirectResolver,
    fetcher: FileFetcher,
    namer: NameDeriver,
    concurrency: usize,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        resolver: RedirectResolver,
        fetcher: FileFetcher,
        namer: NameDeriver,
        concurrency: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            namer,
            concurrency: concurrency.max(1),
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = build_client(config.fetch_timeout())?;
        Ok(Self::new(
            RedirectResolver::new(client.clone(), config.fetch_timeout()),
            FileFetcher::new(client, config.fetch_timeout(), config.max_file_bytes),
            NameDeriver::new(&config.default_extension),
            config.fetch_concurrency,
            config.request_timeout(),
        ))
    }

    /// Run every URL through the pipeline and finalize the archive into
    /// `workspace`.
    ///
    /// The archive file is only created once the first item succeeds, so a
    /// run where everything fails leaves nothing on disk. Compression and
    /// disk writes run on the blocking pool.
    pub async fn run(
        &self,
        urls: &[String],
        workspace: &Workspace,
    ) -> Result<PipelineOutcome, PipelineError> {
        let deadline = Instant::now() + self.request_timeout;
        let item_budget = self.fetcher.timeout();
        let mut archive: Option<ArchiveBuilder> = None;
        let mut names = NameRegistry::new();
        let mut failures = Vec::new();

        let results = stream::iter(urls.iter().cloned().enumerate())
            .map(|(index, url)| async move {
                // One budget covers the redirect probe and the download.
                let item_deadline = (Instant::now() + item_budget).min(deadline);
                let result = match timeout_at(item_deadline, self.retrieve(index, &url)).await {
                    Ok(result) => result,
                    Err(_) if item_deadline < deadline => Err(FetchError::Timeout),
                    Err(_) => Err(FetchError::DeadlineExceeded),
                };
                (index, url, result)
            })
            .buffered(self.concurrency);
        let mut results = std::pin::pin!(results);

        while let Some((index, url, result)) = results.next().await {
            match result {
                Ok((source, payload)) => {
                    let name = names.claim(self.namer.derive(
                        &source.final_url,
                        &payload.headers,
                        payload.source_index,
                    ));
                    let bytes = payload.bytes.len();

                    let pending = archive.take();
                    let archive_path = workspace.archive_path().to_path_buf();
                    let entry = name.clone();
                    archive = Some(
                        run_blocking(move || {
                            let mut builder = match pending {
                                Some(builder) => builder,
                                None => ArchiveBuilder::create(&archive_path)?,
                            };
                            builder.append(&entry, &payload.bytes)?;
                            Ok(builder)
                        })
                        .await?,
                    );

                    tracing::debug!(
                        request_id = %workspace.request_id(),
                        index,
                        entry = %name,
                        bytes,
                        redirected = source.was_redirected(),
                        "Archived item"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %workspace.request_id(),
                        index,
                        url = %url_preview(&url),
                        error = %e,
                        "Skipping item"
                    );
                    failures.push(ItemFailure {
                        index,
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let attempted = urls.len();
        let Some(archive) = archive else {
            return Err(PipelineError::AllDownloadsFailed { attempted });
        };

        let finished = run_blocking(move || archive.finalize()).await?;
        tracing::info!(
            request_id = %workspace.request_id(),
            attempted,
            succeeded = finished.entries,
            failed = failures.len(),
            size_bytes = finished.size_bytes,
            "Archive finalized"
        );

        Ok(PipelineOutcome {
            attempted,
            succeeded: finished.entries,
            failures,
            archive_path: Some(finished.path),
        })
    }

    async fn retrieve(
        &self,
        index: usize,
        url: &str,
    ) -> Result<(ResolvedSource, FetchedPayload), FetchError> {
        let source = self.resolver.resolve(url).await;
        let payload = self.fetcher.fetch(&source.final_url, index).await?;
        Ok((source, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_can_be_spawned() {
        let pipeline = Pipeline::from_config(&Config::default()).unwrap();
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().to_path_buf();

        // Handlers need the run future to be Send across its borrows.
        let handle = tokio::spawn(async move {
            let workspace = Workspace::create(&scratch).unwrap();
            let urls = vec!["http://127.0.0.1:9/unreachable".to_string()];
            pipeline.run(&urls, &workspace).await.map(|o| o.attempted)
        });

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(PipelineError::AllDownloadsFailed { attempted: 1 })
        ));
    }
}
