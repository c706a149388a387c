// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-request scratch storage.
//!
//! Each request gets its own directory under the scratch root, named after a
//! random request id, so concurrent requests never touch each other's files.
//! The directory is removed exactly once: by [`Workspace::release`] or, on
//! any other exit path, when the workspace is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::utils::request_id;

/// File name of the archive inside a workspace.
pub const ARCHIVE_FILE_NAME: &str = "files.zip";

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    archive_path: PathBuf,
    request_id: String,
}

impl Workspace {
    /// Allocate a fresh workspace under `root`, creating `root` if needed.
    pub fn create(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        let request_id = request_id();
        let dir = tempfile::Builder::new()
            .prefix(&format!("linkbundle-{}-", request_id))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        let archive_path = path.join(ARCHIVE_FILE_NAME);

        tracing::debug!(request_id = %request_id, "Workspace allocated");

        Ok(Self {
            dir: Some(dir),
            path,
            archive_path,
            request_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the request's archive is written.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Remove the workspace now, reporting any error. This blocks; async
    /// callers should run it on the blocking pool.
    pub fn release(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                dir.close()?;
                tracing::debug!(request_id = %self.request_id, "Workspace released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let request_id = std::mem::take(&mut self.request_id);

        // Recursive deletion is blocking I/O; keep it off runtime workers.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || close_dir(dir, &request_id));
            }
            Err(_) => close_dir(dir, &request_id),
        }
    }
}

fn close_dir(dir: TempDir, request_id: &str) {
    match dir.close() {
        Ok(()) => tracing::debug!(request_id = %request_id, "Workspace released"),
        Err(e) => tracing::warn!(
            request_id = %request_id,
            error = %e,
            "Failed to remove workspace"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspaces_are_unique() {
        let root = TempDir::new().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert_ne!(a.request_id(), b.request_id());
        assert!(a.path().starts_with(root.path()));
        assert_eq!(a.archive_path(), a.path().join(ARCHIVE_FILE_NAME));
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains(a.request_id()));
    }

    #[test]
    fn test_release_removes_contents() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let path = workspace.path().to_path_buf();
        fs::write(workspace.archive_path(), b"data").unwrap();
        fs::create_dir(path.join("nested")).unwrap();

        workspace.release().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_inside_runtime_removes_directory() {
        let root = TempDir::new().unwrap();
        let path = {
            let workspace = Workspace::create(root.path()).unwrap();
            fs::write(workspace.archive_path(), b"partial").unwrap();
            workspace.path().to_path_buf()
        };

        for _ in 0..40 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("workspace {:?} was not removed", path);
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let path = {
            let workspace = Workspace::create(root.path()).unwrap();
            fs::write(workspace.archive_path(), b"partial").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("a/b");
        let workspace = Workspace::create(&nested).unwrap();
        assert!(workspace.path().starts_with(&nested));
    }
}
