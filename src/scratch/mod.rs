//! Scoped temporary directories.
//!
//! Both directories here follow the same idiom: creation pairs with a
//! guaranteed teardown in `Drop`, so the tree is removed on success, on
//! fatal error, and when an in-flight future is dropped on interrupt. The
//! directory names are fixed by the output contract (they carry the pid),
//! which is why these are hand guards rather than `tempfile` builders.

use std::path::{Path, PathBuf};

use crate::model::Mark;

// =============================================================================
// ScratchDir
// =============================================================================

/// The per-process spill area: `.rs<pid>` under the invocation directory.
///
/// Holds blob and inline payloads for the duration of the run; every spill
/// file shares the directory's lifetime.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `.rs<pid>` under `root`.
    pub async fn create(root: &Path) -> std::io::Result<ScratchDir> {
        let path = root.join(format!(".rs{}", std::process::id()));
        tokio::fs::create_dir(&path).await?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stable spill path for the blob with the given mark.
    pub fn blob_file(&self, mark: Mark) -> PathBuf {
        self.path.join(format!("blob-{}", mark))
    }

    /// The spill path for the n-th inline payload of a commit.
    pub fn inline_file(&self, commit: &str, ordinal: usize) -> PathBuf {
        self.path.join(format!("inline-{}-{}", commit, ordinal))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

// =============================================================================
// WorkDir
// =============================================================================

/// The replay workspace: `temp-import-<pid>` under a caller-chosen root.
///
/// All check-ins happen inside this tree; the populated `RCS` directories
/// are renamed out on success and whatever remains is removed on drop.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create `temp-import-<pid>` under `root`.
    pub async fn create(root: &Path) -> std::io::Result<WorkDir> {
        let path = root.join(format!("temp-import-{}", std::process::id()));
        tokio::fs::create_dir(&path).await?;
        Ok(WorkDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
