//! Transport-facing error taxonomy.
//!
//! The storage layer's domain errors never cross the DAV boundary raw:
//! [`DavError::from_storage`] is the single, total translation from
//! [`StorageError`] to the closed set of transport errors. Sync clients key
//! their retry heuristics off the HTTP status each variant implies, so the
//! mapping must stay stable.

use oxidav_storage::StorageError;
use thiserror::Error;

/// Errors surfaced to DAV clients.
#[derive(Debug, Clone, Error)]
pub enum DavError {
    /// Terminal permission failure. `retry` is the policy-hook hint that
    /// the identical request may be retried later.
    #[error("{message}")]
    Forbidden { message: String, retry: bool },

    /// Path or filename failed validation. Forbidden family: the client
    /// must not retry without changing the name.
    #[error("{0}")]
    InvalidPath(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A parent collection is missing.
    #[error("{0}")]
    Conflict(String),

    /// The target already exists (MKCOL on an existing resource).
    #[error("{0}")]
    AlreadyExists(String),

    /// A read raced an exclusive lock. Retry after backoff.
    #[error("{0}")]
    Locked(String),

    /// A write lost the serialization race on the target path. Retry
    /// after backoff.
    #[error("{0}")]
    FileLocked(String),

    #[error("{0}")]
    EntityTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    InsufficientStorage(String),

    /// Backend or encryption subsystem not ready. Retry later.
    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    NotImplemented(String),

    /// Overwrite precondition failed.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Unrecognized failure; no retry guidance.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DavError {
    /// The HTTP status this error implies.
    pub fn status(&self) -> u16 {
        match self {
            DavError::Forbidden { .. } | DavError::InvalidPath(_) => 403,
            DavError::BadRequest(_) => 400,
            DavError::NotFound(_) => 404,
            DavError::Conflict(_) => 409,
            DavError::AlreadyExists(_) => 405,
            DavError::Locked(_) | DavError::FileLocked(_) => 423,
            DavError::PreconditionFailed(_) => 412,
            DavError::EntityTooLarge(_) => 413,
            DavError::UnsupportedMediaType(_) => 415,
            DavError::InsufficientStorage(_) => 507,
            DavError::ServiceUnavailable(_) => 503,
            DavError::NotImplemented(_) => 501,
            DavError::Internal(_) => 500,
        }
    }

    /// Whether clients may retry the identical request.
    pub fn retryable(&self) -> bool {
        match self {
            DavError::Forbidden { retry, .. } => *retry,
            DavError::Locked(_) | DavError::FileLocked(_) | DavError::ServiceUnavailable(_) => true,
            _ => false,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        DavError::Forbidden {
            message: message.into(),
            retry: false,
        }
    }

    /// Translate a domain error into its transport form.
    ///
    /// One arm per domain condition; adding a variant to `StorageError`
    /// forces a decision here.
    pub fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::PermissionDenied { .. } => DavError::Forbidden {
                message: err.to_string(),
                retry: false,
            },
            StorageError::ForbiddenPath { message, retry } => {
                DavError::Forbidden { message, retry }
            }
            StorageError::EntityTooLarge { .. } => DavError::EntityTooLarge(err.to_string()),
            StorageError::UnsupportedMediaType { .. } => {
                DavError::UnsupportedMediaType(err.to_string())
            }
            StorageError::InvalidPath { .. } => DavError::InvalidPath(err.to_string()),
            StorageError::Locked(inner) => DavError::Locked(inner.to_string()),
            StorageError::EncryptionNotReady { .. } | StorageError::NotAvailable { .. } => {
                DavError::ServiceUnavailable(err.to_string())
            }
            StorageError::Invalid { .. } => DavError::NotFound(err.to_string()),
            StorageError::NotFound { .. } => DavError::NotFound(err.to_string()),
            StorageError::Io(_) => DavError::Internal(err.to_string()),
        }
    }

    /// Translation for the write path, where a lock conflict means the
    /// caller lost the serialization race rather than a read race.
    pub fn from_storage_write(err: StorageError) -> Self {
        match err {
            StorageError::Locked(inner) => DavError::FileLocked(inner.to_string()),
            other => DavError::from_storage(other),
        }
    }
}

/// Result alias for pipeline operations.
pub type DavResult<T> = Result<T, DavError>;
