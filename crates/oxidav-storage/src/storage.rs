//! The per-mount storage backend trait.
//!
//! A backend owns two things: raw content, and the authoritative metadata
//! index that resolution and listings read from. The two are deliberately
//! decoupled: bytes written through [`Storage::write`] are invisible to
//! [`Storage::entry`]/[`Storage::list`] until [`Storage::update_index`]
//! runs. That gap is what keeps in-flight part files out of every listing
//! a sync client sees.

use crate::error::StorageResult;
use crate::file_info::{EntryAttrs, FileKind, FreeSpace, Permissions};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;

/// Index-independent stat result, used for part files.
#[derive(Debug, Clone)]
pub struct RawStat {
    pub size: u64,
    pub mtime: SystemTime,
    pub kind: FileKind,
}

/// One row of the authoritative metadata index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Path inside the storage, no leading slash; empty for the root.
    pub path: String,
    pub file_id: u64,
    pub size: u64,
    pub mtime: SystemTime,
    pub etag: String,
    pub mime_type: String,
    pub kind: FileKind,
    pub permissions: Permissions,
    pub encrypted: bool,
    pub checksum: Option<String>,
}

impl IndexEntry {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A mounted storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stable identifier, unique within a view.
    fn id(&self) -> &str;

    /// Whether writing directly to the final path is already atomic and
    /// cheap on this backend, making part-file staging unnecessary.
    fn supports_atomic_direct_write(&self) -> bool {
        false
    }

    /// Whether raw content exists at the path (indexed or not).
    async fn file_exists(&self, path: &str) -> StorageResult<bool>;

    /// Stat raw content, bypassing the index. Works on part files.
    async fn stat_raw(&self, path: &str) -> StorageResult<RawStat>;

    /// Look up one path in the metadata index.
    async fn entry(&self, path: &str) -> StorageResult<Option<IndexEntry>>;

    /// List the indexed children of a directory.
    async fn list(&self, path: &str) -> StorageResult<Vec<IndexEntry>>;

    async fn read(&self, path: &str) -> StorageResult<Bytes>;

    /// Write raw content. Returns the number of bytes written. Does NOT
    /// touch the index.
    async fn write(&self, path: &str, data: Bytes) -> StorageResult<u64>;

    /// Create a directory (content and index).
    async fn mkdir(&self, path: &str) -> StorageResult<()>;

    /// Remove a directory recursively (content and index).
    async fn rmdir(&self, path: &str) -> StorageResult<()>;

    /// Remove a file (content and index entry, if any).
    async fn unlink(&self, path: &str) -> StorageResult<()>;

    /// Rename within this storage, carrying index entries along.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Move raw content from another storage onto this one. Returns the
    /// move's success flag; callers double-check target existence because
    /// a silent partial move would corrupt client-visible state.
    ///
    /// The default is a copy-then-delete; backends with a cheaper
    /// same-storage path override it.
    async fn move_from_storage(
        &self,
        source: &Arc<dyn Storage>,
        source_path: &str,
        target_path: &str,
    ) -> StorageResult<bool> {
        let data = source.read(source_path).await?;
        self.write(target_path, data).await?;
        source.unlink_raw(source_path).await?;
        Ok(true)
    }

    /// Remove raw content without touching the index. Used to clean up
    /// part files, which are never indexed.
    async fn unlink_raw(&self, path: &str) -> StorageResult<()>;

    /// Set the content mtime (and index mtime when the path is indexed).
    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()>;

    /// Re-scan one path into the index: allocate a file id on first sight,
    /// assign a fresh etag, refresh size/mtime, and ripple new etags up the
    /// parent chain.
    async fn update_index(&self, path: &str) -> StorageResult<IndexEntry>;

    /// Partial attribute write-through on an index entry.
    async fn set_attrs(&self, path: &str, attrs: EntryAttrs) -> StorageResult<()>;

    async fn free_space(&self) -> StorageResult<FreeSpace>;
}

/// Normalize an internal path: trim slashes, collapse nothing else.
pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Parent of a normalized internal path, or `None` at the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').map_or("", |(parent, _)| parent))
}
