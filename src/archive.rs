// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! ZIP archive construction.
//!
//! Entries are streamed into the output file as they are appended; only the
//! central directory is written at [`ArchiveBuilder::finalize`]. Finalizing
//! consumes the builder, so nothing can be appended afterwards.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive write failure. Always terminal for the request.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive format error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Run archive work on the blocking pool.
///
/// Deflate over a large payload and `fsync` can take seconds; on a runtime
/// worker that would stall every other request and timer on the thread.
pub async fn run_blocking<T, F>(op: F) -> Result<T, ArchiveError>
where
    F: FnOnce() -> Result<T, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await?
}

/// A completed archive on disk.
#[derive(Debug, Clone)]
pub struct FinishedArchive {
    pub path: PathBuf,
    pub entries: usize,
    pub size_bytes: u64,
}

pub struct ArchiveBuilder {
    writer: ZipWriter<File>,
    path: PathBuf,
    entries: usize,
}

impl ArchiveBuilder {
    /// Create (or truncate) the archive file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: ZipWriter::new(file),
            path,
            entries: 0,
        })
    }

    /// Add one entry. Names must be unique within the archive.
    pub fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(bytes.len() as u64 >= u32::MAX as u64);

        self.writer.start_file(name, options)?;
        self.writer.write_all(bytes)?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the central directory and flush the file to disk.
    pub fn finalize(self) -> Result<FinishedArchive, ArchiveError> {
        let file = self.writer.finish()?;
        file.sync_all()?;
        let size_bytes = file.metadata()?.len();

        Ok(FinishedArchive {
            path: self.path,
            entries: self.entries,
            size_bytes,
        })
    }
}

impl std::fmt::Debug for ArchiveBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveBuilder")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_entries(path: &Path) -> Vec<(String, String)> {
        let file = File::open(path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut entry = zip.by_index(i).unwrap();
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                (entry.name().to_string(), content)
            })
            .collect()
    }

    #[test]
    fn test_entries_keep_append_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("files.zip");

        let mut archive = ArchiveBuilder::create(&path).unwrap();
        archive.append("b.txt", b"second letter").unwrap();
        archive.append("a.txt", b"first letter").unwrap();
        archive.append("empty.pdf", b"").unwrap();
        assert_eq!(archive.entries(), 3);

        let finished = archive.finalize().unwrap();
        assert_eq!(finished.entries, 3);
        assert!(finished.size_bytes > 0);

        let entries = read_entries(&path);
        assert_eq!(
            entries,
            vec![
                ("b.txt".to_string(), "second letter".to_string()),
                ("a.txt".to_string(), "first letter".to_string()),
                ("empty.pdf".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut archive = ArchiveBuilder::create(dir.path().join("files.zip")).unwrap();
        archive.append("same.pdf", b"1").unwrap();
        assert!(archive.append("same.pdf", b"2").is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_append_leaves_runtime_responsive() {
        use std::sync::{Arc, Mutex};
        use std::time::Instant;

        let dir = TempDir::new().unwrap();
        let builder = ArchiveBuilder::create(dir.path().join("files.zip")).unwrap();
        // Poorly compressible payload so deflate has real work to do.
        let payload: Vec<u8> = (0u32..8 * 1024 * 1024)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
            .collect();

        let ticked = Arc::new(Mutex::new(None));
        let tick = Arc::clone(&ticked);
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            *tick.lock().unwrap() = Some(Instant::now());
        });

        let appended_at = run_blocking(move || {
            let mut builder = builder;
            builder.append("big.bin", &payload)?;
            Ok(Instant::now())
        })
        .await
        .unwrap();
        ticker.await.unwrap();

        let ticked_at = ticked.lock().unwrap().expect("ticker ran");
        assert!(ticked_at < appended_at, "timer was starved by the append");
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone/files.zip");
        let result = run_blocking(move || ArchiveBuilder::create(path)).await;
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = ArchiveBuilder::create(dir.path().join("gone/files.zip"));
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }
}
