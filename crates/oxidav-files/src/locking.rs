//! Lock guards for the write pipeline.
//!
//! Every mutating request holds a shared lock on its target for the whole
//! operation and escalates to exclusive only for the rename/metadata-update
//! window. Both transitions are guard types: dropping a guard restores the
//! lock state it replaced, so no early-error path can leave a stale lock
//! behind.

use crate::error::{DavError, DavResult};
use oxidav_storage::{LockKind, StorageView};
use tracing::trace;

/// Shared lock held around a mutating method, released on drop.
///
/// Acquisition failure surfaces as `FileLocked` (423): another writer owns
/// the path and the client should back off and retry.
#[derive(Debug)]
#[must_use = "the lock is released when the guard drops"]
pub struct SharedLockGuard<'a> {
    view: &'a StorageView,
    path: String,
    released: bool,
}

impl<'a> SharedLockGuard<'a> {
    pub fn acquire(view: &'a StorageView, path: &str) -> DavResult<Self> {
        view.lock_file(path, LockKind::Shared)
            .map_err(|e| DavError::FileLocked(e.to_string()))?;
        trace!(path = %path, "shared lock acquired");
        Ok(Self {
            view,
            path: path.to_string(),
            released: false,
        })
    }

    /// Release explicitly (equivalent to dropping).
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.view.unlock_file(&self.path, LockKind::Shared);
            trace!(path = %self.path, "shared lock released");
        }
    }
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// The exclusive window of a commit: upgrade on construction, downgrade on
/// success, and a drop that restores the shared lock if the commit bailed
/// out early.
#[derive(Debug)]
#[must_use = "dropping the window downgrades the lock immediately"]
pub struct ExclusiveWindow<'a> {
    view: &'a StorageView,
    path: String,
    active: bool,
}

impl<'a> ExclusiveWindow<'a> {
    /// Escalate the caller's shared lock to exclusive.
    pub fn upgrade(view: &'a StorageView, path: &str) -> DavResult<Self> {
        view.change_lock(path, LockKind::Exclusive)
            .map_err(|e| DavError::FileLocked(e.to_string()))?;
        trace!(path = %path, "lock upgraded to exclusive");
        Ok(Self {
            view,
            path: path.to_string(),
            active: true,
        })
    }

    /// End the window, restoring the shared lock.
    pub fn downgrade(mut self) -> DavResult<()> {
        self.active = false;
        self.view
            .change_lock(&self.path, LockKind::Shared)
            .map_err(|e| DavError::FileLocked(e.to_string()))?;
        trace!(path = %self.path, "lock downgraded to shared");
        Ok(())
    }
}

impl Drop for ExclusiveWindow<'_> {
    fn drop(&mut self) {
        if self.active {
            // Early error return: restore the shared lock the caller holds.
            let _ = self.view.change_lock(&self.path, LockKind::Shared);
            trace!(path = %self.path, "lock downgraded to shared on unwind");
        }
    }
}
