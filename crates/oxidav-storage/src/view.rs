//! Path-routing view over mounted storage backends.
//!
//! The view is what the DAV pipeline talks to: it resolves view paths to
//! `(storage, internal_path)` pairs across the mount table, builds
//! [`FileInfo`] snapshots from index entries, forwards advisory locking,
//! and emits write-policy hooks.

use crate::error::{LockKind, LockedError, StorageError, StorageResult};
use crate::file_info::{EntryAttrs, FileInfo, FileKind, FreeSpace, MountType, Permissions};
use crate::hooks::HookRegistry;
use crate::lock::LockManager;
use crate::storage::{IndexEntry, Storage, normalize_path, parent_path};
use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

/// Maximum accepted view-path length.
const MAX_PATH_LENGTH: usize = 4000;

/// Filenames rejected unconditionally.
const RESERVED_NAMES: &[&str] = &[".htaccess"];

/// One storage mounted at a view path.
#[derive(Clone)]
pub struct MountPoint {
    /// View path of the mount root, normalized; empty for the root mount.
    pub root: String,
    pub storage: Arc<dyn Storage>,
    pub mount_type: MountType,
}

/// Mounted, lockable view of one or more storage backends.
pub struct StorageView {
    /// Mount table, longest root first.
    mounts: Vec<MountPoint>,
    locks: Arc<dyn LockManager>,
    hooks: HookRegistry,
}

impl StorageView {
    /// View with a single backend mounted at the root.
    pub fn new(root_storage: Arc<dyn Storage>, locks: Arc<dyn LockManager>) -> Self {
        Self {
            mounts: vec![MountPoint {
                root: String::new(),
                storage: root_storage,
                mount_type: MountType::Local,
            }],
            locks,
            hooks: HookRegistry::new(),
        }
    }

    /// Mount an additional backend under a view path.
    pub fn mount(&mut self, root: &str, storage: Arc<dyn Storage>, mount_type: MountType) {
        self.mounts.push(MountPoint {
            root: normalize_path(root),
            storage,
            mount_type,
        });
        self.mounts.sort_by(|a, b| b.root.len().cmp(&a.root.len()));
    }

    pub fn register_hook(&mut self, hook: Arc<dyn crate::hooks::WriteHook>) {
        self.hooks.register(hook);
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    fn mount_for(&self, path: &str) -> StorageResult<(&MountPoint, String)> {
        let path = normalize_path(path);
        for mount in &self.mounts {
            if mount.root.is_empty() {
                return Ok((mount, path));
            }
            if path == mount.root {
                return Ok((mount, String::new()));
            }
            if let Some(rest) = path.strip_prefix(&format!("{}/", mount.root)) {
                return Ok((mount, rest.to_string()));
            }
        }
        Err(StorageError::Invalid {
            reason: "no storage mounted at the root".to_string(),
        })
    }

    /// Resolve a view path to its backing storage and internal path.
    pub fn resolve_path(&self, path: &str) -> StorageResult<(Arc<dyn Storage>, String)> {
        let (mount, internal) = self.mount_for(path)?;
        Ok((Arc::clone(&mount.storage), internal))
    }

    fn info_from_entry(&self, path: &str, mount: &MountPoint, entry: IndexEntry) -> FileInfo {
        FileInfo {
            path: normalize_path(path),
            internal_path: entry.path.clone(),
            storage_id: mount.storage.id().to_string(),
            file_id: Some(entry.file_id),
            mtime: entry.mtime,
            size: entry.size,
            etag: Some(entry.etag.clone()),
            permissions: entry.permissions,
            mime_type: entry.mime_type.clone(),
            kind: entry.kind,
            mount_type: mount.mount_type,
            encrypted: entry.encrypted,
            checksum: entry.checksum,
        }
    }

    /// Metadata snapshot from the authoritative index, or `None`.
    pub async fn get_file_info(&self, path: &str) -> StorageResult<Option<FileInfo>> {
        let (mount, internal) = self.mount_for(path)?;
        let entry = mount.storage.entry(&internal).await?;
        Ok(entry.map(|e| self.info_from_entry(path, mount, e)))
    }

    /// Snapshot for paths that are deliberately excluded from the index
    /// (in-flight part files): raw stat, full permissions, no identity.
    pub async fn get_part_file_info(&self, path: &str) -> StorageResult<FileInfo> {
        let (mount, internal) = self.mount_for(path)?;
        let stat = mount.storage.stat_raw(&internal).await?;
        let mut info = FileInfo::placeholder(normalize_path(path), internal);
        info.storage_id = mount.storage.id().to_string();
        info.size = stat.size;
        info.mtime = stat.mtime;
        info.kind = stat.kind;
        info.permissions = Permissions::ALL;
        info.mount_type = mount.mount_type;
        Ok(info)
    }

    /// Indexed children of a directory, as view-path snapshots.
    pub async fn get_directory_content(&self, path: &str) -> StorageResult<Vec<FileInfo>> {
        let path = normalize_path(path);
        let (mount, internal) = self.mount_for(&path)?;
        let entries = mount.storage.list(&internal).await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let child_path = if path.is_empty() {
                    entry.name().to_string()
                } else {
                    format!("{path}/{}", entry.name())
                };
                self.info_from_entry(&child_path, mount, entry)
            })
            .collect())
    }

    pub async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.file_exists(&internal).await
    }

    pub async fn read_file(&self, path: &str) -> StorageResult<Bytes> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.read(&internal).await
    }

    /// Raw content write; the index is untouched until [`Self::update`].
    pub async fn write_stream(&self, path: &str, data: Bytes) -> StorageResult<u64> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.write(&internal, data).await
    }

    pub async fn mkdir(&self, path: &str) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.mkdir(&internal).await
    }

    pub async fn rmdir(&self, path: &str) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.rmdir(&internal).await
    }

    pub async fn unlink(&self, path: &str) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.unlink(&internal).await
    }

    /// Remove raw content only (part-file cleanup).
    pub async fn unlink_raw(&self, path: &str) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.unlink_raw(&internal).await
    }

    pub async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.touch(&internal, mtime).await
    }

    /// Move a file or directory, crossing storage boundaries when needed.
    pub async fn rename(&self, source: &str, target: &str) -> StorageResult<()> {
        let (source_mount, source_internal) = self.mount_for(source)?;
        let (target_mount, target_internal) = self.mount_for(target)?;
        if source_mount.storage.id() == target_mount.storage.id() {
            return source_mount
                .storage
                .rename(&source_internal, &target_internal)
                .await;
        }

        debug!(source = %source, target = %target, "cross-storage move");
        let info = self
            .get_file_info(source)
            .await?
            .ok_or_else(|| StorageError::not_found(source))?;
        if info.kind == FileKind::Directory {
            self.copy(source, target).await?;
            self.rmdir(source).await?;
        } else {
            let data = source_mount.storage.read(&source_internal).await?;
            target_mount.storage.write(&target_internal, data).await?;
            target_mount.storage.update_index(&target_internal).await?;
            source_mount.storage.unlink(&source_internal).await?;
        }
        Ok(())
    }

    /// Recursive copy. Byte copy only; the destination is re-indexed.
    pub async fn copy(&self, source: &str, target: &str) -> StorageResult<()> {
        let info = self
            .get_file_info(source)
            .await?
            .ok_or_else(|| StorageError::not_found(source))?;
        if info.kind == FileKind::Directory {
            self.mkdir(target).await?;
            let children = self.get_directory_content(source).await?;
            for child in children {
                let child_target = format!("{}/{}", normalize_path(target), child.name());
                Box::pin(self.copy(&child.path, &child_target)).await?;
            }
        } else {
            let data = self.read_file(source).await?;
            self.write_stream(target, data).await?;
            self.update(target).await?;
        }
        Ok(())
    }

    /// Incremental metadata update for one path; returns the fresh snapshot.
    pub async fn update(&self, path: &str) -> StorageResult<FileInfo> {
        let (mount, internal) = self.mount_for(path)?;
        let entry = mount.storage.update_index(&internal).await?;
        trace!(path = %path, etag = %entry.etag, "index updated");
        Ok(self.info_from_entry(path, mount, entry))
    }

    pub async fn put_file_info(&self, path: &str, attrs: EntryAttrs) -> StorageResult<()> {
        let (mount, internal) = self.mount_for(path)?;
        mount.storage.set_attrs(&internal, attrs).await
    }

    /// Free space on the storage resolving a path.
    pub async fn free_space(&self, path: &str) -> StorageResult<FreeSpace> {
        let (mount, _) = self.mount_for(path)?;
        mount.storage.free_space().await
    }

    /// Validate a directory path plus a filename about to be created in it.
    pub fn verify_path(&self, path: &str, name: &str) -> StorageResult<()> {
        let full = if path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", normalize_path(path))
        };
        if full.len() > MAX_PATH_LENGTH {
            return Err(StorageError::invalid_path(format!(
                "path length {} exceeds maximum {MAX_PATH_LENGTH}",
                full.len()
            )));
        }
        for component in full.split('/') {
            Self::verify_component(component)?;
        }
        Ok(())
    }

    fn verify_component(component: &str) -> StorageResult<()> {
        if component.is_empty() {
            return Err(StorageError::invalid_path("empty path segment"));
        }
        if component == "." || component == ".." {
            return Err(StorageError::invalid_path("path contains invalid segments"));
        }
        if component.contains('\\') {
            return Err(StorageError::invalid_path(
                "filename contains a backslash",
            ));
        }
        if component.chars().any(|c| (c as u32) < 0x20) {
            return Err(StorageError::invalid_path(
                "filename contains at least one invalid character",
            ));
        }
        if RESERVED_NAMES.contains(&component) {
            return Err(StorageError::invalid_path("filename is a reserved word"));
        }
        Ok(())
    }

    pub fn lock_file(&self, path: &str, kind: LockKind) -> Result<(), LockedError> {
        self.locks.acquire(&normalize_path(path), kind)
    }

    pub fn unlock_file(&self, path: &str, kind: LockKind) {
        self.locks.release(&normalize_path(path), kind);
    }

    pub fn change_lock(&self, path: &str, target: LockKind) -> Result<(), LockedError> {
        self.locks.change(&normalize_path(path), target)
    }

    pub fn emit_pre_write(&self, path: &str, exists: bool) -> StorageResult<()> {
        self.hooks.emit_pre_write(&normalize_path(path), exists)
    }

    pub fn emit_post_write(&self, path: &str, existed: bool) {
        self.hooks.emit_post_write(&normalize_path(path), existed);
    }
}

impl std::fmt::Debug for StorageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageView")
            .field("mounts", &self.mounts.len())
            .finish()
    }
}

/// Parent view path of a normalized path, empty at the root.
pub fn view_parent(path: &str) -> &str {
    parent_path(path).unwrap_or("")
}
