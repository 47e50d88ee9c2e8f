//! Node identity: a path plus its metadata snapshot.

use crate::directory::Directory;
use crate::error::{DavError, DavResult};
use crate::file::File;
use oxidav_storage::{FileInfo, Permissions, StorageView};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;

/// Identity + metadata wrapper around one path.
///
/// The snapshot is captured at construction or refresh time only;
/// staleness between mutations is expected and resolved by an explicit
/// [`Node::refresh_info`].
pub struct Node {
    view: Arc<StorageView>,
    path: String,
    info: RwLock<FileInfo>,
}

impl Node {
    pub fn new(view: Arc<StorageView>, path: impl Into<String>, info: FileInfo) -> Self {
        Self {
            view,
            path: path.into(),
            info: RwLock::new(info),
        }
    }

    pub fn view(&self) -> &Arc<StorageView> {
        &self.view
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Clone of the current snapshot.
    pub fn info(&self) -> FileInfo {
        self.info.read().clone()
    }

    pub fn set_info(&self, info: FileInfo) {
        *self.info.write() = info;
    }

    pub fn file_id(&self) -> Option<u64> {
        self.info.read().file_id
    }

    pub fn etag(&self) -> Option<String> {
        self.info.read().etag.clone()
    }

    pub fn quoted_etag(&self) -> Option<String> {
        self.info.read().quoted_etag()
    }

    pub fn size(&self) -> u64 {
        self.info.read().size
    }

    pub fn mtime(&self) -> SystemTime {
        self.info.read().mtime
    }

    pub fn permissions(&self) -> Permissions {
        self.info.read().permissions
    }

    /// Re-stat the path and replace the snapshot.
    pub async fn refresh_info(&self) -> DavResult<()> {
        let info = if self.path.ends_with(".part") {
            self.view
                .get_part_file_info(&self.path)
                .await
                .map_err(DavError::from_storage)?
        } else {
            self.view
                .get_file_info(&self.path)
                .await
                .map_err(DavError::from_storage)?
                .ok_or_else(|| DavError::NotFound(format!("{} not found", self.path)))?
        };
        self.set_info(info);
        Ok(())
    }

    /// Write-through mtime update plus snapshot refresh.
    pub async fn touch(&self, mtime: Option<SystemTime>) -> DavResult<()> {
        self.view
            .touch(&self.path, mtime)
            .await
            .map_err(DavError::from_storage_write)?;
        self.refresh_info().await
    }

    /// Write-through etag override plus snapshot refresh.
    pub async fn set_etag(&self, etag: impl Into<String>) -> DavResult<()> {
        self.view
            .put_file_info(
                &self.path,
                oxidav_storage::EntryAttrs {
                    etag: Some(etag.into()),
                    ..oxidav_storage::EntryAttrs::default()
                },
            )
            .await
            .map_err(DavError::from_storage_write)?;
        self.refresh_info().await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("file_id", &self.file_id())
            .finish()
    }
}

/// A resolved DAV node: file or directory.
#[derive(Debug)]
pub enum DavNode {
    File(File),
    Directory(Directory),
}

impl DavNode {
    pub fn node(&self) -> &Node {
        match self {
            DavNode::File(file) => file.node(),
            DavNode::Directory(dir) => dir.node(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DavNode::Directory(_))
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            DavNode::File(file) => Some(file),
            DavNode::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            DavNode::Directory(dir) => Some(dir),
            DavNode::File(_) => None,
        }
    }

    pub fn path(&self) -> &str {
        self.node().path()
    }

    pub fn info(&self) -> FileInfo {
        self.node().info()
    }
}
