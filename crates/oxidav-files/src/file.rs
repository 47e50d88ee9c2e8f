//! File nodes: content reads and the atomic upload state machine.
//!
//! `put` is the one write path: plain PUTs and the final assembly of
//! chunked uploads both stage into a part file (unless the storage writes
//! atomically), then commit with rename + metadata update inside a brief
//! exclusive-lock window. The caller holds a shared lock on the path for
//! the whole request; this module only ever escalates and restores it.

use crate::chunking::{ChunkCache, ChunkName, ChunkStored};
use crate::error::{DavError, DavResult};
use crate::locking::{ExclusiveWindow, SharedLockGuard};
use crate::request::{WriteContext, WriteOutcome};
use bytes::{Bytes, BytesMut};
use oxidav_storage::{EntryAttrs, FileInfo, StorageView, view_parent};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, warn};

/// A file node.
#[derive(Debug)]
pub struct File {
    node: crate::node::Node,
}

impl File {
    pub fn new(view: Arc<StorageView>, path: impl Into<String>, info: FileInfo) -> Self {
        Self {
            node: crate::node::Node::new(view, path, info),
        }
    }

    pub fn node(&self) -> &crate::node::Node {
        &self.node
    }

    /// Read the full content.
    ///
    /// An encrypted file whose encryption module is unavailable surfaces as
    /// service-unavailable: the client should retry later, nothing is
    /// permanently wrong.
    pub async fn get(&self) -> DavResult<Bytes> {
        self.node
            .view()
            .read_file(self.node.path())
            .await
            .map_err(DavError::from_storage)
    }

    /// The stored client checksum, if any.
    pub fn checksum(&self) -> Option<String> {
        self.node.info().checksum
    }

    pub async fn delete(&self) -> DavResult<()> {
        if !self.node.permissions().can_delete() {
            return Err(DavError::forbidden(format!(
                "{} cannot be deleted",
                self.node.path()
            )));
        }
        self.node
            .view()
            .unlink(self.node.path())
            .await
            .map_err(DavError::from_storage_write)
    }

    /// Write content. Requires the caller to hold a shared lock on the
    /// path. Returns `None` when a chunk was accepted but the transfer is
    /// not complete yet.
    #[instrument(level = "debug", skip(self, ctx, data, chunks), fields(path = %self.node.path(), len = data.len()))]
    pub async fn put(
        &self,
        ctx: &WriteContext,
        data: Bytes,
        chunks: &ChunkCache,
    ) -> DavResult<Option<WriteOutcome>> {
        let view = Arc::clone(self.node.view());
        let path = self.node.path().to_string();

        // Pre-check against the snapshot: an existing, non-updatable
        // target fails before any byte is written.
        let info = self.node.info();
        let existed = view
            .file_exists(&path)
            .await
            .map_err(DavError::from_storage)?;
        if info.file_id.is_some() && existed && !info.permissions.can_update() {
            return Err(DavError::forbidden(format!("{path} is not updatable")));
        }

        view.verify_path(view_parent(&path), self.node.name())
            .map_err(DavError::from_storage)?;

        if ctx.chunked {
            return self.put_chunked(ctx, data, chunks).await;
        }

        let (storage, _) = view.resolve_path(&path).map_err(DavError::from_storage)?;
        let needs_part = !storage.supports_atomic_direct_write() && path.len() > 1;
        let part_path =
            needs_part.then(|| format!("{path}.ocTransferId{}.part", rand::random::<u32>()));
        let write_path = part_path.as_deref().unwrap_or(&path);

        // Stream the body to the staging path.
        let written = match view.write_stream(write_path, data).await {
            Ok(written) => written,
            Err(err) => {
                cleanup_part(&view, part_path.as_deref()).await;
                return Err(DavError::from_storage_write(err));
            }
        };
        if let Some(expected) = ctx.content_length
            && expected != written
        {
            cleanup_part(&view, part_path.as_deref()).await;
            return Err(DavError::BadRequest(format!(
                "expected filesize of {expected} bytes but read (from client) and wrote (to storage) {written} bytes"
            )));
        }

        let outcome = self
            .commit(ctx, &view, &path, part_path.as_deref(), existed)
            .await?;
        Ok(Some(outcome))
    }

    /// Commit a staged write: hooks, exclusive window, rename, metadata
    /// update, mtime, checksum.
    async fn commit(
        &self,
        ctx: &WriteContext,
        view: &Arc<StorageView>,
        path: &str,
        part_path: Option<&str>,
        existed: bool,
    ) -> DavResult<WriteOutcome> {
        if let Err(err) = view.emit_pre_write(path, existed) {
            cleanup_part(view, part_path).await;
            return Err(DavError::from_storage_write(err));
        }

        let window = match ExclusiveWindow::upgrade(view, path) {
            Ok(window) => window,
            Err(err) => {
                cleanup_part(view, part_path).await;
                return Err(err);
            }
        };

        if let Some(part) = part_path {
            if let Err(err) = self.rename_part_to_final(view, part, path).await {
                cleanup_part(view, Some(part)).await;
                return Err(err);
            }
        }

        let fresh = view
            .update(path)
            .await
            .map_err(DavError::from_storage_write)?;
        self.node.set_info(fresh);

        window.downgrade()?;
        view.emit_post_write(path, existed);

        // Client-cooperative mtime: best effort, never fails the request.
        let mut mtime_accepted = false;
        if let Some(secs) = ctx.requested_mtime {
            match view.touch(path, Some(mtime_from_epoch(secs))).await {
                Ok(()) => mtime_accepted = true,
                Err(err) => warn!(path = %path, %err, "could not apply client mtime"),
            }
        }

        self.apply_checksum(view, path, ctx).await?;
        self.node.refresh_info().await?;

        let info = self.node.info();
        debug!(path = %path, etag = ?info.etag, "put committed");
        Ok(WriteOutcome {
            etag: info.quoted_etag().unwrap_or_default(),
            file_id: info.file_id,
            mtime_accepted,
            checksum: info.checksum.clone(),
            previously_existed: existed,
        })
    }

    /// Atomically move the part file onto the final path, verifying both
    /// the move's return flag and the target's existence. Either check
    /// failing is a hard error: a silent partial write would corrupt
    /// client-visible state.
    async fn rename_part_to_final(
        &self,
        view: &Arc<StorageView>,
        part: &str,
        path: &str,
    ) -> DavResult<()> {
        let (target_storage, target_internal) =
            view.resolve_path(path).map_err(DavError::from_storage)?;
        let (part_storage, part_internal) =
            view.resolve_path(part).map_err(DavError::from_storage)?;
        let moved = target_storage
            .move_from_storage(&part_storage, &part_internal, &target_internal)
            .await
            .map_err(DavError::from_storage_write)?;
        let target_present = target_storage
            .file_exists(&target_internal)
            .await
            .unwrap_or(false);
        if !moved || !target_present {
            return Err(DavError::Internal(
                "Could not rename part file to final file".to_string(),
            ));
        }
        Ok(())
    }

    /// Persist a client checksum, or clear a stale one left from a
    /// previous write, refreshing nothing by itself.
    async fn apply_checksum(
        &self,
        view: &Arc<StorageView>,
        path: &str,
        ctx: &WriteContext,
    ) -> DavResult<()> {
        if let Some(checksum) = &ctx.checksum {
            view.put_file_info(
                path,
                EntryAttrs {
                    checksum: Some(Some(checksum.clone())),
                    ..EntryAttrs::default()
                },
            )
            .await
            .map_err(DavError::from_storage_write)?;
        } else if self.node.info().checksum.is_some() {
            view.put_file_info(
                path,
                EntryAttrs {
                    checksum: Some(None),
                    ..EntryAttrs::default()
                },
            )
            .await
            .map_err(DavError::from_storage_write)?;
        }
        Ok(())
    }

    /// Chunked-upload branch: account this chunk, and assemble once all
    /// declared chunks are present.
    async fn put_chunked(
        &self,
        ctx: &WriteContext,
        data: Bytes,
        chunks: &ChunkCache,
    ) -> DavResult<Option<WriteOutcome>> {
        let Some(chunk) = ChunkName::decode(self.node.name()) else {
            return Err(DavError::NotImplemented(
                "invalid chunk name format".to_string(),
            ));
        };

        let received = data.len() as u64;
        let stored = chunks.store(&chunk, data)?;

        // A chunk whose byte count disagrees with the declared length is
        // discarded; the rest of the transfer stays intact.
        if let Some(expected) = ctx.content_length
            && expected != received
        {
            chunks.discard_chunk(&chunk);
            return Err(DavError::BadRequest(format!(
                "expected filesize of {expected} bytes but read (from client) and wrote (to storage) {received} bytes"
            )));
        }

        match stored {
            ChunkStored::Pending { received, total } => {
                debug!(
                    transfer = %chunk.session_key(),
                    received,
                    total,
                    "chunk accepted, transfer incomplete"
                );
                Ok(None)
            }
            ChunkStored::Late => Ok(None),
            ChunkStored::Complete => self.assemble(ctx, &chunk, chunks).await,
        }
    }

    /// Assemble a completed transfer into the final path.
    async fn assemble(
        &self,
        ctx: &WriteContext,
        chunk: &ChunkName,
        chunks: &ChunkCache,
    ) -> DavResult<Option<WriteOutcome>> {
        let view = Arc::clone(self.node.view());
        let key = chunk.session_key();
        // Exactly-once claim; a racing finalizer sees an accepted chunk.
        let Some(parts) = chunks.take_complete(&key) else {
            return Ok(None);
        };

        let parent = view_parent(self.node.path());
        let target = if parent.is_empty() {
            chunk.base.clone()
        } else {
            format!("{parent}/{}", chunk.base)
        };

        let existed = view
            .file_exists(&target)
            .await
            .map_err(DavError::from_storage)?;

        // The shared lock on the assembled target is ours to manage: the
        // caller's request lock covers the chunk path, not the target.
        let guard = SharedLockGuard::acquire(&view, &target)?;
        view.emit_pre_write(&target, existed)
            .map_err(DavError::from_storage_write)?;
        let window = ExclusiveWindow::upgrade(&view, &target)?;

        // Storage composition may have changed since the first chunk.
        let (storage, _) = view.resolve_path(&target).map_err(DavError::from_storage)?;
        let needs_part = !storage.supports_atomic_direct_write() && target.len() > 1;
        let part_path =
            needs_part.then(|| format!("{target}.ocTransferId{}.part", chunk.transfer_id));
        let write_path = part_path.as_deref().unwrap_or(&target);

        let mut assembled = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
        for part in parts {
            assembled.extend_from_slice(&part);
        }

        if let Err(err) = view.write_stream(write_path, assembled.freeze()).await {
            self.cleanup_assembly(&view, part_path.as_deref(), &target, existed)
                .await;
            return Err(DavError::from_storage_write(err));
        }

        if let Some(part) = part_path.as_deref() {
            if let Err(err) = self.rename_part_to_final(&view, part, &target).await {
                cleanup_part(&view, Some(part)).await;
                return Err(err);
            }
        }

        let mut mtime_accepted = false;
        if let Some(secs) = ctx.requested_mtime {
            match view.touch(&target, Some(mtime_from_epoch(secs))).await {
                Ok(()) => mtime_accepted = true,
                Err(err) => warn!(path = %target, %err, "could not apply client mtime"),
            }
        }

        let fresh = view
            .update(&target)
            .await
            .map_err(DavError::from_storage_write)?;

        window.downgrade()?;
        view.emit_post_write(&target, existed);

        if let Some(checksum) = &ctx.checksum {
            view.put_file_info(
                &target,
                EntryAttrs {
                    checksum: Some(Some(checksum.clone())),
                    ..EntryAttrs::default()
                },
            )
            .await
            .map_err(DavError::from_storage_write)?;
        } else if fresh.checksum.is_some() {
            view.put_file_info(
                &target,
                EntryAttrs {
                    checksum: Some(None),
                    ..EntryAttrs::default()
                },
            )
            .await
            .map_err(DavError::from_storage_write)?;
        }

        let info = view
            .get_file_info(&target)
            .await
            .map_err(DavError::from_storage)?
            .ok_or_else(|| DavError::NotFound(format!("{target} not found after assembly")))?;
        guard.release();

        debug!(transfer = %key, path = %target, "chunked upload assembled");
        Ok(Some(WriteOutcome {
            etag: info.quoted_etag().unwrap_or_default(),
            file_id: info.file_id,
            mtime_accepted,
            checksum: info.checksum.clone(),
            previously_existed: existed,
        }))
    }

    /// Remove whatever the failed assembly managed to create.
    async fn cleanup_assembly(
        &self,
        view: &Arc<StorageView>,
        part_path: Option<&str>,
        target: &str,
        existed: bool,
    ) {
        if part_path.is_some() {
            cleanup_part(view, part_path).await;
        } else if !existed {
            // Direct write onto a fresh target: remove the partial file.
            view.unlink_raw(target).await.ok();
        }
    }
}

/// Delete an orphaned part file, best effort.
async fn cleanup_part(view: &Arc<StorageView>, part_path: Option<&str>) {
    if let Some(part) = part_path
        && let Err(err) = view.unlink_raw(part).await
    {
        warn!(part = %part, %err, "could not clean up part file");
    }
}

fn mtime_from_epoch(secs: i64) -> SystemTime {
    if secs <= 0 {
        SystemTime::UNIX_EPOCH
    } else {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64)
    }
}
