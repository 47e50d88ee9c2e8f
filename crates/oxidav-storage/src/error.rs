//! Domain error types for the storage layer.
//!
//! Every failure a storage backend, the view, or a write hook can produce is
//! one of these variants. The DAV pipeline translates them into transport
//! errors with a single total mapping, so backends never leak their own
//! error types across the protocol boundary.

use std::io;
use thiserror::Error;

/// Lock kind for advisory path locks.
///
/// Shared locks may coexist; an exclusive lock excludes all others,
/// including other shared holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// A path-level lock could not be acquired or changed.
#[derive(Debug, Clone, Error)]
#[error("\"{path}\" is locked")]
pub struct LockedError {
    /// The contended path, view-relative.
    pub path: String,
}

impl LockedError {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Errors surfaced by storage backends, the view, and write hooks.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is temporarily unreachable. Retryable.
    #[error("storage is not available: {reason}")]
    NotAvailable { reason: String },

    /// The backend exists but is in an unusable state (e.g. a mount whose
    /// metadata index is gone). Resolution treats this as not-found.
    #[error("storage is invalid: {reason}")]
    Invalid { reason: String },

    /// No metadata exists for the path.
    #[error("{path} not found")]
    NotFound { path: String },

    /// The operation is not permitted for this path.
    #[error("permission denied for {path}")]
    PermissionDenied { path: String },

    /// The path or filename failed validation.
    #[error("invalid path: {reason}")]
    InvalidPath { reason: String },

    /// A policy hook vetoed the write. `retry` signals whether the client
    /// may retry the same request (e.g. after a virus-scan false positive).
    #[error("{message}")]
    ForbiddenPath { message: String, retry: bool },

    /// The payload exceeds a configured size limit.
    #[error("upload of {size} bytes exceeds limit of {limit} bytes")]
    EntityTooLarge { size: u64, limit: u64 },

    /// The payload's content type is rejected by policy.
    #[error("content type {mime} is not allowed")]
    UnsupportedMediaType { mime: String },

    /// An advisory lock is held by another writer.
    #[error(transparent)]
    Locked(#[from] LockedError),

    /// The file is encrypted but the encryption module cannot serve it
    /// right now. Retryable.
    #[error("encryption module is not ready: {reason}")]
    EncryptionNotReady { reason: String },

    /// Underlying I/O failure from a disk-backed storage.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn not_available(reason: impl Into<String>) -> Self {
        Self::NotAvailable {
            reason: reason.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    pub fn invalid_path(reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            reason: reason.into(),
        }
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_names_the_path() {
        let err = LockedError::new("docs/report.txt");
        assert_eq!(err.to_string(), "\"docs/report.txt\" is locked");
    }

    #[test]
    fn storage_error_messages_are_human_readable() {
        let err = StorageError::EntityTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "upload of 2048 bytes exceeds limit of 1024 bytes"
        );

        let err = StorageError::not_found("a/b.txt");
        assert_eq!(err.to_string(), "a/b.txt not found");
    }
}
