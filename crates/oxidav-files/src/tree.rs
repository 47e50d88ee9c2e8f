//! Request-scoped path → node resolution.
//!
//! The tree memoizes resolved nodes so every collaborator in one request
//! (lock plugin, quota plugin, the put pipeline) observes the same node
//! instance for the same path. `mark_dirty` evicts a path and its whole
//! subtree; the cache is a sorted map so prefix eviction is a range scan,
//! not a full walk.

use crate::chunking::resolve_chunk_name;
use crate::directory::Directory;
use crate::error::{DavError, DavResult};
use crate::file::File;
use crate::node::DavNode;
use oxidav_storage::{FileKind, StorageView, normalize_path, view_parent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Shared path → node cache.
///
/// Held by the tree and by every directory the tree constructs, so child
/// resolution during a listing populates the same cache.
#[derive(Clone, Default)]
pub struct NodeCache {
    nodes: Arc<Mutex<BTreeMap<String, Arc<DavNode>>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<DavNode>> {
        self.nodes.lock().get(path).cloned()
    }

    pub fn insert(&self, path: &str, node: Arc<DavNode>) {
        self.nodes.lock().insert(path.to_string(), node);
    }

    /// Evict a path and every descendant. An empty path clears everything.
    pub fn mark_dirty(&self, path: &str) {
        let path = normalize_path(path);
        let mut nodes = self.nodes.lock();
        if path.is_empty() {
            nodes.clear();
            return;
        }
        nodes.remove(&path);
        let prefix = format!("{path}/");
        let stale: Vec<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            nodes.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache").field("len", &self.len()).finish()
    }
}

/// Maps request paths to nodes over a storage view.
pub struct ObjectTree {
    view: Option<Arc<StorageView>>,
    cache: NodeCache,
}

impl ObjectTree {
    /// A tree whose view has not been initialized yet; every resolution
    /// fails with service-unavailable until then.
    pub fn uninitialized() -> Self {
        Self {
            view: None,
            cache: NodeCache::new(),
        }
    }

    /// Open a tree over a view, pre-constructing the root node.
    pub async fn open(view: Arc<StorageView>) -> DavResult<Self> {
        let tree = Self {
            view: Some(Arc::clone(&view)),
            cache: NodeCache::new(),
        };
        let root_info = view
            .get_file_info("")
            .await
            .map_err(DavError::from_storage)?
            .ok_or_else(|| DavError::ServiceUnavailable("root storage has no metadata".into()))?;
        let root = Arc::new(DavNode::Directory(Directory::with_cache(
            view,
            "",
            root_info,
            tree.cache.clone(),
        )));
        tree.cache.insert("", root);
        Ok(tree)
    }

    fn require_view(&self) -> DavResult<&Arc<StorageView>> {
        self.view
            .as_ref()
            .ok_or_else(|| DavError::ServiceUnavailable("storage view is not ready".to_string()))
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Resolve a request path to its node.
    #[instrument(level = "trace", skip(self))]
    pub async fn get_node_for_path(&self, path: &str) -> DavResult<Arc<DavNode>> {
        let view = self.require_view()?;
        let path = normalize_path(path);

        if let Some(node) = self.cache.get(&path) {
            trace!(path = %path, "node cache hit");
            return Ok(node);
        }

        // Validate before any storage call.
        if !path.is_empty() {
            let name = path.rsplit('/').next().unwrap_or(&path);
            view.verify_path(view_parent(&path), name)
                .map_err(DavError::from_storage)?;
        }

        // In-flight part files are intentionally excluded from the
        // authoritative index; stat them raw.
        if path.ends_with(".part") {
            let info = view
                .get_part_file_info(&path)
                .await
                .map_err(DavError::from_storage)?;
            let node = Arc::new(DavNode::File(File::new(
                Arc::clone(view),
                path.clone(),
                info,
            )));
            self.cache.insert(&path, Arc::clone(&node));
            return Ok(node);
        }

        // A chunk-encoded name resolves to its assembly target.
        let name = path.rsplit('/').next().unwrap_or(&path);
        let resolved_name = resolve_chunk_name(name);
        let lookup_path = if resolved_name == name {
            path.clone()
        } else {
            let parent = view_parent(&path);
            if parent.is_empty() {
                resolved_name.to_string()
            } else {
                format!("{parent}/{resolved_name}")
            }
        };
        if lookup_path != path
            && let Some(node) = self.cache.get(&lookup_path)
        {
            return Ok(node);
        }

        let info = view
            .get_file_info(&lookup_path)
            .await
            .map_err(DavError::from_storage)?
            .ok_or_else(|| DavError::NotFound(format!("{lookup_path} not found")))?;

        let node = Arc::new(match info.kind {
            FileKind::Directory => DavNode::Directory(Directory::with_cache(
                Arc::clone(view),
                lookup_path.clone(),
                info,
                self.cache.clone(),
            )),
            FileKind::File => {
                DavNode::File(File::new(Arc::clone(view), lookup_path.clone(), info))
            }
        });
        self.cache.insert(&lookup_path, Arc::clone(&node));
        Ok(node)
    }

    pub async fn node_exists(&self, path: &str) -> DavResult<bool> {
        match self.get_node_for_path(path).await {
            Ok(_) => Ok(true),
            Err(DavError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Evict a subtree from the cache after a mutation that could
    /// invalidate cached metadata.
    pub fn mark_dirty(&self, path: &str) {
        debug!(path = %path, "evicting cached nodes");
        self.cache.mark_dirty(path);
    }

    /// Copy a node. Destination-parent writability is checked before any
    /// bytes move; afterwards the destination subtree is evicted so later
    /// resolutions re-read fresh metadata.
    pub async fn copy(&self, source: &str, destination: &str) -> DavResult<()> {
        let view = self.require_view()?;
        let source = normalize_path(source);
        let destination = normalize_path(destination);

        if !self.node_exists(&source).await? {
            return Err(DavError::NotFound(format!("{source} not found")));
        }

        let destination_exists = self.node_exists(&destination).await?;
        let check_path = if destination_exists {
            destination.clone()
        } else {
            view_parent(&destination).to_string()
        };
        let check_info = view
            .get_file_info(&check_path)
            .await
            .map_err(DavError::from_storage)?
            .ok_or_else(|| DavError::Conflict(format!("{check_path} not found")))?;
        let allowed = if destination_exists {
            check_info.permissions.can_update()
        } else {
            check_info.permissions.can_create()
        };
        if !allowed {
            return Err(DavError::forbidden(format!(
                "no permission to write to {destination}"
            )));
        }

        let destination_name = destination.rsplit('/').next().unwrap_or(&destination);
        view.verify_path(view_parent(&destination), destination_name)
            .map_err(DavError::from_storage)?;

        view.copy(&source, &destination)
            .await
            .map_err(DavError::from_storage_write)?;

        self.mark_dirty(view_parent(&destination));
        Ok(())
    }

    /// Move a node, evicting both affected subtrees.
    pub async fn move_node(&self, source: &str, destination: &str) -> DavResult<()> {
        let view = self.require_view()?;
        let source = normalize_path(source);
        let destination = normalize_path(destination);

        let source_node = self.get_node_for_path(&source).await?;
        if !source_node.info().permissions.can_delete() {
            return Err(DavError::forbidden(format!("{source} cannot be moved")));
        }

        let destination_exists = self.node_exists(&destination).await?;
        let check_path = if destination_exists {
            destination.clone()
        } else {
            view_parent(&destination).to_string()
        };
        let check_info = view
            .get_file_info(&check_path)
            .await
            .map_err(DavError::from_storage)?
            .ok_or_else(|| DavError::Conflict(format!("{check_path} not found")))?;
        let allowed = if destination_exists {
            check_info.permissions.can_update()
        } else {
            check_info.permissions.can_create()
        };
        if !allowed {
            return Err(DavError::forbidden(format!(
                "no permission to write to {destination}"
            )));
        }

        let destination_name = destination.rsplit('/').next().unwrap_or(&destination);
        view.verify_path(view_parent(&destination), destination_name)
            .map_err(DavError::from_storage)?;

        view.rename(&source, &destination)
            .await
            .map_err(DavError::from_storage_write)?;

        self.mark_dirty(&source);
        self.mark_dirty(view_parent(&destination));
        Ok(())
    }
}

impl std::fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTree")
            .field("initialized", &self.view.is_some())
            .field("cached", &self.cache.len())
            .finish()
    }
}
