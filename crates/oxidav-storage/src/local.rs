//! Local-disk storage backend.
//!
//! Content lives under a root directory on the local filesystem; the
//! authoritative metadata index is kept in-process with the same
//! discipline as [`MemoryStorage`](crate::memory::MemoryStorage): raw
//! writes (part files) are invisible to listings until `update_index`.

use crate::error::{StorageError, StorageResult};
use crate::file_info::{DIR_MIME_TYPE, EntryAttrs, FileKind, FreeSpace, Permissions};
use crate::storage::{IndexEntry, RawStat, Storage, normalize_path, parent_path};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tracing::trace;

/// [`Storage`] backed by a directory on the local filesystem.
pub struct LocalStorage {
    id: String,
    root: PathBuf,
    index: RwLock<HashMap<String, IndexEntry>>,
    next_file_id: AtomicU64,
    etag_counter: AtomicU64,
}

impl LocalStorage {
    /// Open a backend rooted at an existing directory.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> StorageResult<Arc<Self>> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StorageError::Invalid {
                reason: format!("{} is not a directory", root.display()),
            });
        }
        let storage = Self {
            id: id.into(),
            root,
            index: RwLock::new(HashMap::new()),
            next_file_id: AtomicU64::new(1),
            etag_counter: AtomicU64::new(1),
        };
        storage.seed_root();
        Ok(Arc::new(storage))
    }

    fn seed_root(&self) {
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.index.write().insert(
            String::new(),
            IndexEntry {
                path: String::new(),
                file_id,
                size: 0,
                mtime: SystemTime::now(),
                etag: self.fresh_etag(),
                mime_type: DIR_MIME_TYPE.to_string(),
                kind: FileKind::Directory,
                permissions: Permissions::ALL,
                encrypted: false,
                checksum: None,
            },
        );
    }

    fn fresh_etag(&self) -> String {
        let n = self.etag_counter.fetch_add(1, Ordering::Relaxed);
        format!("{:x}{:07x}", self.id.len() + 2, n)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn map_io(path: &str, err: io::Error) -> StorageError {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::not_found(path),
            io::ErrorKind::PermissionDenied => StorageError::permission_denied(path),
            _ => StorageError::Io(err),
        }
    }

    fn bump_parent_etags(&self, path: &str) {
        let mut index = self.index.write();
        let mut current = parent_path(path).map(str::to_string);
        while let Some(p) = current {
            let etag = self.fresh_etag();
            if let Some(entry) = index.get_mut(&p) {
                entry.etag = etag;
            }
            current = parent_path(&p).map(str::to_string);
        }
    }

    fn index_one(&self, path: &str, stat: &RawStat) -> IndexEntry {
        let mut index = self.index.write();
        let file_id = index
            .get(path)
            .map_or_else(|| self.next_file_id.fetch_add(1, Ordering::Relaxed), |e| {
                e.file_id
            });
        let permissions = index.get(path).map_or(Permissions::ALL, |e| e.permissions);
        let entry = IndexEntry {
            path: path.to_string(),
            file_id,
            size: stat.size,
            mtime: stat.mtime,
            etag: self.fresh_etag(),
            mime_type: match stat.kind {
                FileKind::Directory => DIR_MIME_TYPE.to_string(),
                FileKind::File => "application/octet-stream".to_string(),
            },
            kind: stat.kind,
            permissions,
            encrypted: false,
            checksum: index.get(path).and_then(|e| e.checksum.clone()),
        };
        index.insert(path.to_string(), entry.clone());
        entry
    }

    #[cfg(unix)]
    fn statvfs_free(root: &Path) -> FreeSpace {
        match nix::sys::statvfs::statvfs(root) {
            Ok(stat) => {
                let free = u64::from(stat.blocks_available()) * u64::from(stat.fragment_size());
                FreeSpace::Bytes(free)
            }
            Err(_) => FreeSpace::Unknown,
        }
    }

    #[cfg(not(unix))]
    fn statvfs_free(_root: &Path) -> FreeSpace {
        FreeSpace::Unknown
    }

    async fn stat_fs(&self, full: &Path, path: &str) -> StorageResult<RawStat> {
        let meta = fs::metadata(full)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(RawStat {
            size: meta.len(),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            kind: if meta.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            },
        })
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let path = normalize_path(path);
        Ok(fs::try_exists(self.full_path(&path))
            .await
            .unwrap_or(false))
    }

    async fn stat_raw(&self, path: &str) -> StorageResult<RawStat> {
        let path = normalize_path(path);
        self.stat_fs(&self.full_path(&path), &path).await
    }

    async fn entry(&self, path: &str) -> StorageResult<Option<IndexEntry>> {
        Ok(self.index.read().get(&normalize_path(path)).cloned())
    }

    async fn list(&self, path: &str) -> StorageResult<Vec<IndexEntry>> {
        let path = normalize_path(path);
        let index = self.index.read();
        let mut entries: Vec<IndexEntry> = index
            .values()
            .filter(|entry| {
                !entry.path.is_empty() && parent_path(&entry.path) == Some(path.as_str())
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> StorageResult<Bytes> {
        let path = normalize_path(path);
        let data = fs::read(self.full_path(&path))
            .await
            .map_err(|e| Self::map_io(&path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<u64> {
        let path = normalize_path(path);
        let full = self.full_path(&path);
        let len = data.len() as u64;
        trace!(storage = %self.id, path = %path, len, "raw write");
        fs::write(&full, &data)
            .await
            .map_err(|e| Self::map_io(&path, e))?;
        Ok(len)
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        let path = normalize_path(path);
        fs::create_dir(self.full_path(&path))
            .await
            .map_err(|e| Self::map_io(&path, e))?;
        let stat = self.stat_fs(&self.full_path(&path), &path).await?;
        self.index_one(&path, &stat);
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> StorageResult<()> {
        let path = normalize_path(path);
        fs::remove_dir_all(self.full_path(&path))
            .await
            .map_err(|e| Self::map_io(&path, e))?;
        let prefix = format!("{path}/");
        self.index
            .write()
            .retain(|p, _| p != &path && !p.starts_with(&prefix));
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> StorageResult<()> {
        let path = normalize_path(path);
        fs::remove_file(self.full_path(&path))
            .await
            .map_err(|e| Self::map_io(&path, e))?;
        self.index.write().remove(&path);
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn unlink_raw(&self, path: &str) -> StorageResult<()> {
        let path = normalize_path(path);
        match fs::remove_file(self.full_path(&path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(&path, e)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        fs::rename(self.full_path(&from), self.full_path(&to))
            .await
            .map_err(|e| Self::map_io(&from, e))?;

        let mut index = self.index.write();
        let from_prefix = format!("{from}/");
        let carried: Vec<(String, IndexEntry)> = index
            .iter()
            .filter(|(p, _)| *p == &from || p.starts_with(&from_prefix))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        for (p, _) in &carried {
            index.remove(p);
        }
        let to_prefix = format!("{to}/");
        index.retain(|p, _| p != &to && !p.starts_with(&to_prefix));
        for (p, mut entry) in carried {
            let new_path = format!("{to}{}", &p[from.len()..]);
            entry.path = new_path.clone();
            entry.etag = self.fresh_etag();
            index.insert(new_path, entry);
        }
        drop(index);
        self.bump_parent_etags(&from);
        self.bump_parent_etags(&to);
        Ok(())
    }

    async fn move_from_storage(
        &self,
        source: &Arc<dyn Storage>,
        source_path: &str,
        target_path: &str,
    ) -> StorageResult<bool> {
        if source.id() == self.id {
            let source_path = normalize_path(source_path);
            let target_path = normalize_path(target_path);
            match fs::rename(self.full_path(&source_path), self.full_path(&target_path)).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(Self::map_io(&source_path, e)),
            }
        }
        let data = source.read(source_path).await?;
        self.write(target_path, data).await?;
        source.unlink_raw(source_path).await?;
        Ok(true)
    }

    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        let path = normalize_path(path);
        let stamp = mtime.unwrap_or_else(SystemTime::now);
        if !self.file_exists(&path).await? {
            return Err(StorageError::not_found(&path));
        }
        #[cfg(unix)]
        {
            use nix::sys::stat::utimes;
            use nix::sys::time::TimeVal;
            let secs = stamp
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs());
            let tv = TimeVal::new(secs as i64, 0);
            let _ = utimes(&self.full_path(&path), &tv, &tv);
        }
        if let Some(entry) = self.index.write().get_mut(&path) {
            entry.mtime = stamp;
        }
        Ok(())
    }

    async fn update_index(&self, path: &str) -> StorageResult<IndexEntry> {
        let path = normalize_path(path);
        let stat = self.stat_fs(&self.full_path(&path), &path).await?;
        let entry = self.index_one(&path, &stat);
        self.bump_parent_etags(&path);
        Ok(entry)
    }

    async fn set_attrs(&self, path: &str, attrs: EntryAttrs) -> StorageResult<()> {
        let path = normalize_path(path);
        let mut index = self.index.write();
        let entry = index
            .get_mut(&path)
            .ok_or_else(|| StorageError::not_found(&path))?;
        if let Some(etag) = attrs.etag {
            entry.etag = etag;
        }
        if let Some(mtime) = attrs.mtime {
            entry.mtime = mtime;
        }
        if let Some(checksum) = attrs.checksum {
            entry.checksum = checksum;
        }
        if let Some(permissions) = attrs.permissions {
            entry.permissions = permissions;
        }
        Ok(())
    }

    async fn free_space(&self) -> StorageResult<FreeSpace> {
        Ok(Self::statvfs_free(&self.root))
    }
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}
