//! Write-policy hooks.
//!
//! Hooks run before and after every committed write. A pre-write hook can
//! veto the operation; the veto kind determines the transport error the
//! client sees (403 with an optional retry hint, 413, or 415).

use crate::error::StorageError;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a pre-write veto.
#[derive(Debug, Clone)]
pub enum HookVeto {
    /// Policy rejected the write. `retry` hints whether the client may
    /// retry the identical request later.
    Forbidden { message: String, retry: bool },
    /// The payload exceeds a size limit enforced by policy.
    TooLarge { size: u64, limit: u64 },
    /// The payload's media type is rejected by policy.
    UnsupportedType { mime: String },
}

impl From<HookVeto> for StorageError {
    fn from(veto: HookVeto) -> Self {
        match veto {
            HookVeto::Forbidden { message, retry } => StorageError::ForbiddenPath { message, retry },
            HookVeto::TooLarge { size, limit } => StorageError::EntityTooLarge { size, limit },
            HookVeto::UnsupportedType { mime } => StorageError::UnsupportedMediaType { mime },
        }
    }
}

/// Observer/vetoer of file writes.
///
/// `exists` distinguishes the create variant from the update variant.
pub trait WriteHook: Send + Sync {
    fn pre_write(&self, path: &str, exists: bool) -> Result<(), HookVeto> {
        let _ = (path, exists);
        Ok(())
    }

    fn post_write(&self, path: &str, existed: bool) {
        let _ = (path, existed);
    }
}

/// Ordered set of registered write hooks.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn WriteHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn WriteHook>) {
        self.hooks.push(hook);
    }

    /// Run every pre-write hook; the first veto wins.
    pub fn emit_pre_write(&self, path: &str, exists: bool) -> Result<(), StorageError> {
        for hook in &self.hooks {
            if let Err(veto) = hook.pre_write(path, exists) {
                debug!(path = %path, ?veto, "write vetoed by hook");
                return Err(veto.into());
            }
        }
        Ok(())
    }

    pub fn emit_post_write(&self, path: &str, existed: bool) {
        for hook in &self.hooks {
            hook.post_write(path, existed);
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
