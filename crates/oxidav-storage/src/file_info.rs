//! Typed metadata snapshots for files and directories.
//!
//! A [`FileInfo`] is captured at resolution/refresh time only; staleness is
//! expected and resolved by an explicit re-stat, never by implicit reloads.

use std::time::SystemTime;

/// Mime type sentinel that marks directory entries.
pub const DIR_MIME_TYPE: &str = "httpd/unix-directory";

/// Permission bitmask for a path, mirroring the classic
/// read/update/create/delete/share constants of sync clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u32);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const READ: Permissions = Permissions(1);
    pub const UPDATE: Permissions = Permissions(2);
    pub const CREATE: Permissions = Permissions(4);
    pub const DELETE: Permissions = Permissions(8);
    pub const SHARE: Permissions = Permissions(16);
    pub const ALL: Permissions = Permissions(31);

    pub fn from_bits(bits: u32) -> Self {
        Permissions(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Permissions) -> Self {
        Permissions(self.0 & !other.0)
    }

    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_update(self) -> bool {
        self.contains(Self::UPDATE)
    }

    pub fn can_create(self) -> bool {
        self.contains(Self::CREATE)
    }

    pub fn can_delete(self) -> bool {
        self.contains(Self::DELETE)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

/// Whether a path is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// How the mount owning a path is attached to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountType {
    #[default]
    Local,
    Shared,
    External,
}

/// Free space reported by a storage backend.
///
/// The unlimited sentinel is passed through untransformed so quota
/// consumers can distinguish "no limit" from "zero bytes left".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpace {
    Bytes(u64),
    Unlimited,
    Unknown,
}

/// Used/free pair reported for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    pub used: u64,
    pub free: FreeSpace,
}

/// Immutable-per-request metadata snapshot for one path.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path relative to the view root, no leading or trailing slash.
    pub path: String,
    /// Path inside the resolving storage.
    pub internal_path: String,
    /// Identifier of the resolving storage.
    pub storage_id: String,
    /// Stable file identifier. `None` for paths outside the authoritative
    /// index (part files, placeholders for not-yet-created targets).
    pub file_id: Option<u64>,
    pub mtime: SystemTime,
    pub size: u64,
    /// Opaque version identifier. `None` for unindexed paths.
    pub etag: Option<String>,
    pub permissions: Permissions,
    pub mime_type: String,
    pub kind: FileKind,
    pub mount_type: MountType,
    pub encrypted: bool,
    /// Client-supplied checksum (`TYPE:value`), if one was stored.
    pub checksum: Option<String>,
}

impl FileInfo {
    /// Snapshot for a target that does not exist yet. Carries full
    /// permissions so the write path defers the real check to the parent.
    pub fn placeholder(path: impl Into<String>, internal_path: impl Into<String>) -> Self {
        FileInfo {
            path: path.into(),
            internal_path: internal_path.into(),
            storage_id: String::new(),
            file_id: None,
            mtime: SystemTime::UNIX_EPOCH,
            size: 0,
            etag: None,
            permissions: Permissions::ALL,
            mime_type: "application/octet-stream".to_string(),
            kind: FileKind::File,
            mount_type: MountType::Local,
            encrypted: false,
            checksum: None,
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// The etag in the quoted form clients expect on the wire.
    pub fn quoted_etag(&self) -> Option<String> {
        self.etag.as_ref().map(|e| format!("\"{e}\""))
    }
}

/// Partial attribute write-through for the metadata index.
#[derive(Debug, Clone, Default)]
pub struct EntryAttrs {
    pub etag: Option<String>,
    pub mtime: Option<SystemTime>,
    /// `Some(None)` clears a stored checksum; `Some(Some(v))` sets it.
    pub checksum: Option<Option<String>>,
    pub permissions: Option<Permissions>,
}
