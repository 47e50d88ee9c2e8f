//! In-memory storage backend.
//!
//! Reference implementation of [`Storage`] used by tests and the demo
//! server. Content and index live in separate maps so the part-file
//! discipline (raw bytes invisible until `update_index`) is observable.
//!
//! The backend doubles as a fault-injection harness: tests can take it
//! offline, cap its free space, mark entries as encrypted-but-unreadable,
//! and override permissions per path.

use crate::error::{StorageError, StorageResult};
use crate::file_info::{DIR_MIME_TYPE, EntryAttrs, FileKind, FreeSpace, Permissions};
use crate::storage::{IndexEntry, RawStat, Storage, normalize_path, parent_path};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::trace;

#[derive(Debug, Clone)]
enum MemNode {
    File { data: Bytes, mtime: SystemTime },
    Dir { mtime: SystemTime },
}

impl MemNode {
    fn kind(&self) -> FileKind {
        match self {
            MemNode::File { .. } => FileKind::File,
            MemNode::Dir { .. } => FileKind::Directory,
        }
    }

    fn size(&self) -> u64 {
        match self {
            MemNode::File { data, .. } => data.len() as u64,
            MemNode::Dir { .. } => 0,
        }
    }

    fn mtime(&self) -> SystemTime {
        match self {
            MemNode::File { mtime, .. } | MemNode::Dir { mtime } => *mtime,
        }
    }
}

/// In-memory [`Storage`] with fault injection for tests.
pub struct MemoryStorage {
    id: String,
    direct_write: bool,
    content: RwLock<HashMap<String, MemNode>>,
    index: RwLock<HashMap<String, IndexEntry>>,
    next_file_id: AtomicU64,
    etag_counter: AtomicU64,
    available: AtomicBool,
    quota: RwLock<Option<u64>>,
    unreadable: RwLock<HashSet<String>>,
}

impl MemoryStorage {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::with_direct_write(id, false)
    }

    /// Backend that advertises atomic direct writes (no part files).
    pub fn new_direct_write(id: impl Into<String>) -> Arc<Self> {
        Self::with_direct_write(id, true)
    }

    fn with_direct_write(id: impl Into<String>, direct_write: bool) -> Arc<Self> {
        let storage = Self {
            id: id.into(),
            direct_write,
            content: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            next_file_id: AtomicU64::new(1),
            etag_counter: AtomicU64::new(1),
            available: AtomicBool::new(true),
            quota: RwLock::new(None),
            unreadable: RwLock::new(HashSet::new()),
        };
        storage.seed_root();
        Arc::new(storage)
    }

    fn seed_root(&self) {
        let now = SystemTime::now();
        self.content
            .write()
            .insert(String::new(), MemNode::Dir { mtime: now });
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.index.write().insert(
            String::new(),
            IndexEntry {
                path: String::new(),
                file_id,
                size: 0,
                mtime: now,
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
        format!("{:x}{:07x}", self.id.len() + 1, n)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StorageError::not_available(format!(
                "storage {} is offline",
                self.id
            )))
        }
    }

    /// Take the backend offline (or back online). Test hook.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Cap the total bytes this backend will report as available.
    pub fn set_quota(&self, quota: Option<u64>) {
        *self.quota.write() = quota;
    }

    /// Make reads of a path fail as encrypted-but-unreadable. Test hook.
    pub fn mark_encrypted_unreadable(&self, path: &str) {
        self.unreadable.write().insert(normalize_path(path));
    }

    /// Override the permissions stored for an indexed path. Test hook.
    pub fn set_permissions(&self, path: &str, permissions: Permissions) {
        let path = normalize_path(path);
        if let Some(entry) = self.index.write().get_mut(&path) {
            entry.permissions = permissions;
        }
    }

    fn used_bytes(&self) -> u64 {
        self.content.read().values().map(MemNode::size).sum()
    }

    fn guess_mime(path: &str) -> String {
        match path.rsplit('.').next() {
            Some("txt") | Some("md") => "text/plain".to_string(),
            Some("html") => "text/html".to_string(),
            Some("png") => "image/png".to_string(),
            Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
            Some("pdf") => "application/pdf".to_string(),
            _ => "application/octet-stream".to_string(),
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

    fn index_one(&self, path: &str, node: &MemNode) -> IndexEntry {
        let mut index = self.index.write();
        let file_id = index
            .get(path)
            .map_or_else(|| self.next_file_id.fetch_add(1, Ordering::Relaxed), |e| {
                e.file_id
            });
        let permissions = index.get(path).map_or(Permissions::ALL, |e| e.permissions);
        let encrypted = self.unreadable.read().contains(path);
        let entry = IndexEntry {
            path: path.to_string(),
            file_id,
            size: node.size(),
            mtime: node.mtime(),
            etag: self.fresh_etag(),
            mime_type: match node.kind() {
                FileKind::Directory => DIR_MIME_TYPE.to_string(),
                FileKind::File => Self::guess_mime(path),
            },
            kind: node.kind(),
            permissions,
            encrypted,
            checksum: index.get(path).and_then(|e| e.checksum.clone()),
        };
        index.insert(path.to_string(), entry.clone());
        entry
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_atomic_direct_write(&self) -> bool {
        self.direct_write
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self.content.read().contains_key(&normalize_path(path)))
    }

    async fn stat_raw(&self, path: &str) -> StorageResult<RawStat> {
        self.check_available()?;
        let path = normalize_path(path);
        let content = self.content.read();
        let node = content
            .get(&path)
            .ok_or_else(|| StorageError::not_found(&path))?;
        Ok(RawStat {
            size: node.size(),
            mtime: node.mtime(),
            kind: node.kind(),
        })
    }

    async fn entry(&self, path: &str) -> StorageResult<Option<IndexEntry>> {
        self.check_available()?;
        Ok(self.index.read().get(&normalize_path(path)).cloned())
    }

    async fn list(&self, path: &str) -> StorageResult<Vec<IndexEntry>> {
        self.check_available()?;
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
        self.check_available()?;
        let path = normalize_path(path);
        if self.unreadable.read().contains(&path) {
            return Err(StorageError::EncryptionNotReady {
                reason: format!("no decryption module for {path}"),
            });
        }
        let content = self.content.read();
        match content.get(&path) {
            Some(MemNode::File { data, .. }) => Ok(data.clone()),
            Some(MemNode::Dir { .. }) => Err(StorageError::permission_denied(&path)),
            None => Err(StorageError::not_found(&path)),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<u64> {
        self.check_available()?;
        let path = normalize_path(path);
        let parent = parent_path(&path)
            .ok_or_else(|| StorageError::permission_denied("cannot write the root"))?;
        let mut content = self.content.write();
        match content.get(parent) {
            Some(MemNode::Dir { .. }) => {}
            _ => return Err(StorageError::not_found(parent)),
        }
        let len = data.len() as u64;
        trace!(storage = %self.id, path = %path, len, "raw write");
        content.insert(
            path,
            MemNode::File {
                data,
                mtime: SystemTime::now(),
            },
        );
        Ok(len)
    }

    async fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.check_available()?;
        let path = normalize_path(path);
        let parent = parent_path(&path)
            .ok_or_else(|| StorageError::permission_denied("root already exists"))?;
        let mut content = self.content.write();
        match content.get(parent) {
            Some(MemNode::Dir { .. }) => {}
            _ => return Err(StorageError::not_found(parent)),
        }
        if content.contains_key(&path) {
            return Err(StorageError::permission_denied(&path));
        }
        let node = MemNode::Dir {
            mtime: SystemTime::now(),
        };
        content.insert(path.clone(), node.clone());
        drop(content);
        self.index_one(&path, &node);
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> StorageResult<()> {
        self.check_available()?;
        let path = normalize_path(path);
        let mut content = self.content.write();
        match content.get(&path) {
            Some(MemNode::Dir { .. }) => {}
            Some(MemNode::File { .. }) => return Err(StorageError::permission_denied(&path)),
            None => return Err(StorageError::not_found(&path)),
        }
        let prefix = format!("{path}/");
        content.retain(|p, _| p != &path && !p.starts_with(&prefix));
        drop(content);
        self.index
            .write()
            .retain(|p, _| p != &path && !p.starts_with(&prefix));
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> StorageResult<()> {
        self.check_available()?;
        let path = normalize_path(path);
        let mut content = self.content.write();
        match content.get(&path) {
            Some(MemNode::File { .. }) => {}
            Some(MemNode::Dir { .. }) => return Err(StorageError::permission_denied(&path)),
            None => return Err(StorageError::not_found(&path)),
        }
        content.remove(&path);
        drop(content);
        self.index.write().remove(&path);
        self.bump_parent_etags(&path);
        Ok(())
    }

    async fn unlink_raw(&self, path: &str) -> StorageResult<()> {
        self.check_available()?;
        self.content.write().remove(&normalize_path(path));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.check_available()?;
        let from = normalize_path(from);
        let to = normalize_path(to);
        let mut content = self.content.write();
        if !content.contains_key(&from) {
            return Err(StorageError::not_found(&from));
        }
        let from_prefix = format!("{from}/");
        let moved: Vec<(String, MemNode)> = content
            .iter()
            .filter(|(p, _)| *p == &from || p.starts_with(&from_prefix))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        for (p, _) in &moved {
            content.remove(p);
        }
        for (p, node) in moved {
            let new_path = format!("{to}{}", &p[from.len()..]);
            content.insert(new_path, node);
        }
        drop(content);

        let mut index = self.index.write();
        let carried: Vec<(String, IndexEntry)> = index
            .iter()
            .filter(|(p, _)| *p == &from || p.starts_with(&from_prefix))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();
        for (p, _) in &carried {
            index.remove(p);
        }
        // Drop any stale entries shadowed at the target.
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
        self.check_available()?;
        if source.id() == self.id {
            // Same backend: raw content move, index untouched.
            let source_path = normalize_path(source_path);
            let target_path = normalize_path(target_path);
            let mut content = self.content.write();
            let Some(node) = content.remove(&source_path) else {
                return Ok(false);
            };
            content.insert(target_path, node);
            return Ok(true);
        }
        let data = source.read(source_path).await?;
        self.write(target_path, data).await?;
        source.unlink_raw(source_path).await?;
        Ok(true)
    }

    async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> StorageResult<()> {
        self.check_available()?;
        let path = normalize_path(path);
        let stamp = mtime.unwrap_or_else(SystemTime::now);
        let mut content = self.content.write();
        match content.get_mut(&path) {
            Some(MemNode::File { mtime, .. }) | Some(MemNode::Dir { mtime }) => *mtime = stamp,
            None => return Err(StorageError::not_found(&path)),
        }
        drop(content);
        if let Some(entry) = self.index.write().get_mut(&path) {
            entry.mtime = stamp;
        }
        Ok(())
    }

    async fn update_index(&self, path: &str) -> StorageResult<IndexEntry> {
        self.check_available()?;
        let path = normalize_path(path);
        let node = {
            let content = self.content.read();
            content
                .get(&path)
                .cloned()
                .ok_or_else(|| StorageError::not_found(&path))?
        };
        let entry = self.index_one(&path, &node);
        self.bump_parent_etags(&path);
        Ok(entry)
    }

    async fn set_attrs(&self, path: &str, attrs: EntryAttrs) -> StorageResult<()> {
        self.check_available()?;
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
        self.check_available()?;
        Ok(match *self.quota.read() {
            Some(quota) => FreeSpace::Bytes(quota.saturating_sub(self.used_bytes())),
            None => FreeSpace::Unlimited,
        })
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("id", &self.id)
            .field("entries", &self.content.read().len())
            .finish()
    }
}
