//! Storage layer for the oxidav WebDAV pipeline.
//!
//! This crate provides everything the file-operation pipeline consumes
//! from below the DAV boundary:
//!
//! - [`Storage`]: the per-mount backend trait, with an in-memory
//!   implementation ([`MemoryStorage`]) and a local-disk one
//!   ([`LocalStorage`]). Backends keep raw content and the authoritative
//!   metadata index separate, so in-flight part files never appear in
//!   listings.
//! - [`StorageView`]: longest-prefix mount routing, snapshot construction,
//!   path validation, and lock/hook forwarding.
//! - [`LockManager`]: advisory shared/exclusive path locks with the
//!   upgrade/downgrade transition the write pipeline relies on.
//! - [`WriteHook`]: pre/post write policy hooks with veto semantics.

mod error;
mod file_info;
mod hooks;
mod local;
mod lock;
mod memory;
mod storage;
mod view;

pub use error::{LockKind, LockedError, StorageError, StorageResult};
pub use file_info::{
    DIR_MIME_TYPE, EntryAttrs, FileInfo, FileKind, FreeSpace, MountType, Permissions, QuotaInfo,
};
pub use hooks::{HookRegistry, HookVeto, WriteHook};
pub use local::LocalStorage;
pub use lock::{LockManager, LockOp, MemoryLockManager, RecordingLockManager};
pub use memory::MemoryStorage;
pub use storage::{IndexEntry, RawStat, Storage, normalize_path, parent_path};
pub use view::{MountPoint, StorageView, view_parent};
