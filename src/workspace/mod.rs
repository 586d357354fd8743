//! Per-job scratch directories on the host filesystem.
//!
//! Each job owns exactly one workspace for its lifetime. The directory is
//! created under the configured root, populated with the solution and the
//! harness, bind-mounted into the job's containers, and destroyed on every
//! exit path.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use drop_bomb::DropBomb;
use futures::future::BoxFuture;
use futures::prelude::*;
use tokio::fs::read_dir;

use crate::langs::{LanguageProfile, TEST_CASES_SLOT};
use crate::tester::model::Job;

/// A job's scratch directory. Must be released with [`Workspace::destroy`];
/// dropping an armed workspace panics in debug builds.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    _bomb: DropBomb,
}

impl Workspace {
    /// Allocate a fresh directory under `root` and materialise the job's
    /// files: the solution verbatim, and the harness with the test cases
    /// serialised into its single substitution slot.
    pub async fn create(root: &Path, job: &Job, profile: &LanguageProfile) -> io::Result<Workspace> {
        tokio::fs::create_dir_all(root).await?;
        let dir = root.join(unique_dir_name());
        tokio::fs::create_dir(&dir).await?;
        // Canonical path: the container bind mount needs it absolute.
        let dir = tokio::fs::canonicalize(&dir).await?;

        if let Err(e) = Self::populate(&dir, job, profile).await {
            let _ = ensure_removed_dir(&dir).await;
            return Err(e);
        }

        tracing::debug!(dir = %dir.display(), "Workspace created");
        Ok(Workspace {
            dir,
            _bomb: DropBomb::new("`Workspace::destroy()` must be called before dropping!"),
        })
    }

    async fn populate(dir: &Path, job: &Job, profile: &LanguageProfile) -> io::Result<()> {
        let solution = dir.join(&profile.solution_filename);
        tokio::fs::write(&solution, job.code.as_bytes()).await?;

        let cases = serde_json::to_string(&job.test_cases)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let harness = profile.harness_template.replace(TEST_CASES_SLOT, &cases);
        tokio::fs::write(dir.join(&profile.test_filename), harness).await
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Recursive removal. Errors are logged and swallowed; a leftover
    /// directory must never fail the job that produced it.
    pub async fn destroy(mut self) {
        self._bomb.defuse();
        if let Err(e) = ensure_removed_dir(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to destroy workspace");
        } else {
            tracing::debug!(dir = %self.dir.display(), "Workspace destroyed");
        }
    }
}

fn unique_dir_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}-{:08x}", nanos, rand::random::<u32>())
}

/// Remove a directory recursively, clearing read-only bits on the way down
/// so that root-owned or write-protected container outputs do not wedge the
/// removal.
pub fn ensure_removed_dir(path: &Path) -> BoxFuture<io::Result<()>> {
    let path = path.to_owned();
    async move {
        let entries = match read_dir(&path).await {
            Ok(dir) => tokio_stream::wrappers::ReadDirStream::new(dir),
            Err(e) => match e.kind() {
                io::ErrorKind::NotFound => return Ok(()),
                _ => return Err(e),
            },
        };
        entries
            .filter_map(|entry| async move {
                let entry = entry.ok()?;
                let metadata = entry.metadata().await.ok()?;
                let mut permissions = metadata.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                let _ = tokio::fs::set_permissions(entry.path(), permissions).await;
                metadata.file_type().is_dir().then(|| entry.path())
            })
            .map(|dir| async move { ensure_removed_dir(&dir).await })
            .buffered(16usize)
            .for_each(|_| async {})
            .await;
        tokio::fs::remove_dir_all(&path).await
    }
    .boxed()
}

/// Best-effort removal of workspaces left behind by a previous crash.
/// Run once at process start, before any job is accepted.
pub async fn sweep_root(root: &Path) {
    let mut entries = match read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Cannot sweep workspace root");
            return;
        }
    };
    let mut removed = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        match ensure_removed_dir(&entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to sweep stale workspace")
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, root = %root.display(), "Swept stale workspaces");
    }
}
