//! Advisory shared/exclusive path locks.
//!
//! Locks are keyed by normalized view path and are purely advisory: the
//! write pipeline acquires them by convention, storage backends never check
//! them. Acquisition is fail-fast; callers that can retry surface the
//! conflict to the client as a 423 instead of blocking.

use crate::error::{LockKind, LockedError};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Shared/exclusive advisory locks keyed by path.
///
/// Implementations must support the upgrade/downgrade transition used by
/// the write pipeline: `change(path, Exclusive)` succeeds only for the sole
/// shared holder, `change(path, Shared)` always succeeds for the exclusive
/// holder.
pub trait LockManager: Send + Sync {
    fn acquire(&self, path: &str, kind: LockKind) -> Result<(), LockedError>;
    fn release(&self, path: &str, kind: LockKind);
    fn change(&self, path: &str, target: LockKind) -> Result<(), LockedError>;
}

#[derive(Debug, Default)]
struct LockState {
    shared: usize,
    exclusive: bool,
}

/// In-process lock manager backed by a mutex'd path table.
#[derive(Debug, Default)]
pub struct MemoryLockManager {
    states: Mutex<HashMap<String, LockState>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shared holders on a path. Test hook.
    pub fn shared_count(&self, path: &str) -> usize {
        self.states
            .lock()
            .get(path)
            .map_or(0, |state| state.shared)
    }

    /// Whether an exclusive lock is held on a path. Test hook.
    pub fn is_exclusive(&self, path: &str) -> bool {
        self.states
            .lock()
            .get(path)
            .is_some_and(|state| state.exclusive)
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, path: &str, kind: LockKind) -> Result<(), LockedError> {
        let mut states = self.states.lock();
        let state = states.entry(path.to_string()).or_default();
        match kind {
            LockKind::Shared => {
                if state.exclusive {
                    return Err(LockedError::new(path));
                }
                state.shared += 1;
            }
            LockKind::Exclusive => {
                if state.exclusive || state.shared > 0 {
                    return Err(LockedError::new(path));
                }
                state.exclusive = true;
            }
        }
        Ok(())
    }

    fn release(&self, path: &str, kind: LockKind) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(path) {
            match kind {
                LockKind::Shared => state.shared = state.shared.saturating_sub(1),
                LockKind::Exclusive => state.exclusive = false,
            }
            if state.shared == 0 && !state.exclusive {
                states.remove(path);
            }
        }
    }

    fn change(&self, path: &str, target: LockKind) -> Result<(), LockedError> {
        let mut states = self.states.lock();
        let state = states.entry(path.to_string()).or_default();
        match target {
            // Upgrade: only the sole shared holder may escalate.
            LockKind::Exclusive => {
                if state.exclusive || state.shared != 1 {
                    return Err(LockedError::new(path));
                }
                state.shared = 0;
                state.exclusive = true;
            }
            // Downgrade: the exclusive holder steps back to shared.
            LockKind::Shared => {
                if !state.exclusive {
                    return Err(LockedError::new(path));
                }
                state.exclusive = false;
                state.shared = 1;
            }
        }
        Ok(())
    }
}

/// Records every lock transition while delegating to an inner manager.
///
/// Lets tests assert on the exact acquire/change/release sequence a write
/// performs on a path.
#[derive(Debug, Default)]
pub struct RecordingLockManager {
    inner: MemoryLockManager,
    ops: Mutex<Vec<LockOp>>,
}

/// One observed lock transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOp {
    Acquire(String, LockKind),
    Release(String, LockKind),
    Change(String, LockKind),
}

impl RecordingLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<LockOp> {
        self.ops.lock().clone()
    }

    pub fn ops_for(&self, path: &str) -> Vec<LockOp> {
        self.ops
            .lock()
            .iter()
            .filter(|op| match op {
                LockOp::Acquire(p, _) | LockOp::Release(p, _) | LockOp::Change(p, _) => p == path,
            })
            .cloned()
            .collect()
    }
}

impl LockManager for RecordingLockManager {
    fn acquire(&self, path: &str, kind: LockKind) -> Result<(), LockedError> {
        self.inner.acquire(path, kind)?;
        self.ops.lock().push(LockOp::Acquire(path.to_string(), kind));
        Ok(())
    }

    fn release(&self, path: &str, kind: LockKind) {
        self.inner.release(path, kind);
        self.ops.lock().push(LockOp::Release(path.to_string(), kind));
    }

    fn change(&self, path: &str, target: LockKind) -> Result<(), LockedError> {
        self.inner.change(path, target)?;
        self.ops.lock().push(LockOp::Change(path.to_string(), target));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_coexist() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        assert_eq!(locks.shared_count("a.txt"), 2);
    }

    #[test]
    fn exclusive_excludes_everyone() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Exclusive).unwrap();
        assert!(locks.acquire("a.txt", LockKind::Shared).is_err());
        assert!(locks.acquire("a.txt", LockKind::Exclusive).is_err());
    }

    #[test]
    fn shared_blocks_exclusive_acquire() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        assert!(locks.acquire("a.txt", LockKind::Exclusive).is_err());
    }

    #[test]
    fn upgrade_requires_sole_shared_holder() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        assert!(locks.change("a.txt", LockKind::Exclusive).is_err());

        locks.release("a.txt", LockKind::Shared);
        locks.change("a.txt", LockKind::Exclusive).unwrap();
        assert!(locks.is_exclusive("a.txt"));
    }

    #[test]
    fn downgrade_restores_single_shared() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        locks.change("a.txt", LockKind::Exclusive).unwrap();
        locks.change("a.txt", LockKind::Shared).unwrap();
        assert_eq!(locks.shared_count("a.txt"), 1);
        assert!(!locks.is_exclusive("a.txt"));
        // Another reader can now join.
        locks.acquire("a.txt", LockKind::Shared).unwrap();
    }

    #[test]
    fn release_cleans_up_empty_states() {
        let locks = MemoryLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        locks.release("a.txt", LockKind::Shared);
        assert!(locks.states.lock().is_empty());
    }

    #[test]
    fn recording_manager_captures_sequence() {
        let locks = RecordingLockManager::new();
        locks.acquire("a.txt", LockKind::Shared).unwrap();
        locks.change("a.txt", LockKind::Exclusive).unwrap();
        locks.change("a.txt", LockKind::Shared).unwrap();
        locks.release("a.txt", LockKind::Shared);

        assert_eq!(
            locks.ops_for("a.txt"),
            vec![
                LockOp::Acquire("a.txt".to_string(), LockKind::Shared),
                LockOp::Change("a.txt".to_string(), LockKind::Exclusive),
                LockOp::Change("a.txt".to_string(), LockKind::Shared),
                LockOp::Release("a.txt".to_string(), LockKind::Shared),
            ]
        );
    }
}
