//! Directory nodes: listing, child creation, quota reporting.

use crate::chunking::{ChunkCache, ChunkName};
use crate::error::{DavError, DavResult};
use crate::file::File;
use crate::locking::SharedLockGuard;
use crate::node::{DavNode, Node};
use crate::request::{WriteContext, WriteOutcome};
use crate::tree::NodeCache;
use oxidav_storage::{
    DIR_MIME_TYPE, FileInfo, FreeSpace, QuotaInfo, StorageError, StorageView,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A directory node.
///
/// Children and quota are memoized per instance; both are request-scoped
/// because the node itself is.
pub struct Directory {
    node: Node,
    children: Mutex<Option<Vec<Arc<DavNode>>>>,
    quota: Mutex<Option<QuotaInfo>>,
    /// Tree cache to register resolved children in, when a tree built us.
    cache: Option<NodeCache>,
}

impl Directory {
    pub fn new(view: Arc<StorageView>, path: impl Into<String>, info: FileInfo) -> Self {
        Self {
            node: Node::new(view, path, info),
            children: Mutex::new(None),
            quota: Mutex::new(None),
            cache: None,
        }
    }

    pub fn with_cache(
        view: Arc<StorageView>,
        path: impl Into<String>,
        info: FileInfo,
        cache: NodeCache,
    ) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new(view, path, info)
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn child_path(&self, name: &str) -> String {
        if self.node.path().is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.node.path())
        }
    }

    /// Create or update a child file by funneling into [`File::put`].
    ///
    /// Creation and update share one code path; the only extra rule here
    /// is the legacy-chunking exception, where a chunk PUT into a
    /// non-creatable directory is still allowed when the assembled target
    /// itself is updatable.
    #[instrument(level = "debug", skip(self, ctx, data, chunks), fields(dir = %self.node.path(), name = %name))]
    pub async fn create_file(
        &self,
        name: &str,
        ctx: &WriteContext,
        data: bytes::Bytes,
        chunks: &ChunkCache,
    ) -> DavResult<Option<WriteOutcome>> {
        let view = Arc::clone(self.node.view());

        // A chunk PUT whose assembly target already exists is an update of
        // that target; everything else needs create permission here.
        let chunk_target = if ctx.chunked {
            match ChunkName::decode(name) {
                Some(chunk) => {
                    let target = self.child_path(&chunk.base);
                    view.get_file_info(&target)
                        .await
                        .map_err(DavError::from_storage)?
                }
                None => None,
            }
        } else {
            None
        };
        match chunk_target {
            Some(info) => {
                if !info.permissions.can_update() {
                    return Err(DavError::forbidden(format!(
                        "{} is not updatable",
                        info.path
                    )));
                }
            }
            None => {
                if !self.node.permissions().can_create() {
                    return Err(DavError::forbidden(format!(
                        "no permission to create files in {}",
                        self.node.path()
                    )));
                }
            }
        }

        view.verify_path(self.node.path(), name)
            .map_err(DavError::from_storage)?;

        let path = self.child_path(name);
        let placeholder = {
            let (_, internal) = view.resolve_path(&path).map_err(DavError::from_storage)?;
            FileInfo::placeholder(path.clone(), internal)
        };
        let file = File::new(view.clone(), path.clone(), placeholder);

        // Shared lock around the write, exactly as a direct PUT gets one.
        let guard = SharedLockGuard::acquire(&view, &path)?;
        let outcome = file.put(ctx, data, chunks).await;
        guard.release();
        outcome
    }

    /// Create a child directory.
    pub async fn create_directory(&self, name: &str) -> DavResult<()> {
        if !self.node.permissions().can_create() {
            return Err(DavError::forbidden(format!(
                "no permission to create folders in {}",
                self.node.path()
            )));
        }
        let view = self.node.view();
        view.verify_path(self.node.path(), name)
            .map_err(DavError::from_storage)?;
        view.mkdir(&self.child_path(name))
            .await
            .map_err(DavError::from_storage_write)?;
        Ok(())
    }

    /// Resolve one child, reusing a caller-supplied snapshot when the
    /// listing already fetched it.
    pub async fn get_child(&self, name: &str, info: Option<FileInfo>) -> DavResult<Arc<DavNode>> {
        let path = self.child_path(name);
        if let Some(cache) = &self.cache
            && let Some(node) = cache.get(&path)
        {
            return Ok(node);
        }

        let view = Arc::clone(self.node.view());
        let info = match info {
            Some(info) => info,
            None => view
                .get_file_info(&path)
                .await
                .map_err(DavError::from_storage)?
                .ok_or_else(|| DavError::NotFound(format!("{path} not found")))?,
        };

        let node = Arc::new(if info.mime_type == DIR_MIME_TYPE {
            DavNode::Directory(match &self.cache {
                Some(cache) => Directory::with_cache(view, path.clone(), info, cache.clone()),
                None => Directory::new(view, path.clone(), info),
            })
        } else {
            DavNode::File(File::new(view, path.clone(), info))
        });

        if let Some(cache) = &self.cache {
            cache.insert(&path, Arc::clone(&node));
        }
        Ok(node)
    }

    /// List children, memoized per instance. The shared tree cache is
    /// populated transitively as a side effect.
    pub async fn get_children(&self) -> DavResult<Vec<Arc<DavNode>>> {
        if let Some(children) = self.children.lock().clone() {
            return Ok(children);
        }

        let view = self.node.view();
        let infos = view
            .get_directory_content(self.node.path())
            .await
            .map_err(|err| match err {
                StorageError::Locked(inner) => DavError::Locked(inner.to_string()),
                other => DavError::from_storage(other),
            })?;

        let mut children = Vec::with_capacity(infos.len());
        for info in infos {
            let name = info.name().to_string();
            children.push(self.get_child(&name, Some(info)).await?);
        }
        debug!(path = %self.node.path(), count = children.len(), "directory listed");
        *self.children.lock() = Some(children.clone());
        Ok(children)
    }

    pub async fn child_exists(&self, name: &str) -> bool {
        self.get_child(name, None).await.is_ok()
    }

    /// Delete this directory recursively.
    pub async fn delete(&self) -> DavResult<()> {
        if self.node.path().is_empty() || !self.node.permissions().can_delete() {
            return Err(DavError::forbidden(format!(
                "{} cannot be deleted",
                self.node.path()
            )));
        }
        self.node
            .view()
            .rmdir(self.node.path())
            .await
            .map_err(DavError::from_storage_write)
    }

    /// Used/free quota for this directory, memoized. Storage
    /// unavailability degrades to zeros: quota display is best effort,
    /// not authoritative.
    pub async fn quota_info(&self) -> QuotaInfo {
        if let Some(quota) = *self.quota.lock() {
            return quota;
        }
        let info = self.node.info();
        let quota = match self.node.view().free_space(self.node.path()).await {
            Ok(free) => QuotaInfo {
                used: info.size,
                free,
            },
            Err(_) => QuotaInfo {
                used: 0,
                free: FreeSpace::Bytes(0),
            },
        };
        *self.quota.lock() = Some(quota);
        quota
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.node.path())
            .finish()
    }
}
