//! Pre-flight free-space check for uploads.

use crate::chunking::{ChunkCache, ChunkName};
use crate::error::{DavError, DavResult};
use crate::request::WriteContext;
use oxidav_storage::{FreeSpace, StorageView, normalize_path, view_parent};
use tracing::debug;

/// Rejects uploads whose declared length exceeds the free space on the
/// target's storage, before a single byte is streamed.
pub struct QuotaPlugin;

impl QuotaPlugin {
    /// Check the declared upload length against free space.
    ///
    /// The declared length comes from `OC-Total-Length` when present
    /// (chunked transfers declare their full size there), else
    /// `Content-Length`. For chunked uploads, bytes already received for
    /// the transfer are subtracted. No side effects: a passing check
    /// writes nothing, a failing one has touched nothing.
    pub async fn check_quota(
        view: &StorageView,
        path: &str,
        ctx: &WriteContext,
        chunks: Option<&ChunkCache>,
    ) -> DavResult<()> {
        let Some(declared) = ctx.expected_length() else {
            return Ok(());
        };
        if declared == 0 {
            return Ok(());
        }

        let path = normalize_path(path);
        let name = path.rsplit('/').next().unwrap_or(&path);

        let mut length = declared;
        if ctx.chunked
            && let Some(chunk) = ChunkName::decode(name)
            && let Some(cache) = chunks
        {
            length = length.saturating_sub(cache.pending_bytes(&chunk.session_key()));
        }

        // Part files and chunk names never hit quota themselves; the
        // space is accounted against the directory they assemble into.
        let check_path = view_parent(&path);

        let free = match view.free_space(check_path).await {
            Ok(free) => free,
            // Quota is a best-effort pre-flight; an unreachable backend
            // fails later with a better error.
            Err(_) => return Ok(()),
        };

        match free {
            FreeSpace::Bytes(available) if length > available => {
                debug!(path = %path, length, available, "upload exceeds free space");
                Err(DavError::InsufficientStorage(format!(
                    "upload of {length} bytes exceeds the available {available} bytes"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use oxidav_storage::{LockManager, MemoryLockManager, MemoryStorage, Storage};
    use std::sync::Arc;

    fn quota_view(quota: Option<u64>) -> (Arc<MemoryStorage>, StorageView) {
        let storage = MemoryStorage::new("mem");
        storage.set_quota(quota);
        let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
        let view = StorageView::new(storage.clone(), locks);
        (storage, view)
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_side_effects() {
        let (storage, view) = quota_view(Some(100));
        let ctx = WriteContext {
            content_length: Some(200),
            ..WriteContext::default()
        };
        let err = QuotaPlugin::check_quota(&view, "big.bin", &ctx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::InsufficientStorage(_)));
        assert_eq!(err.status(), 507);
        assert!(!storage.file_exists("big.bin").await.unwrap());
    }

    #[tokio::test]
    async fn fitting_upload_passes() {
        let (_, view) = quota_view(Some(100));
        let ctx = WriteContext {
            content_length: Some(100),
            ..WriteContext::default()
        };
        QuotaPlugin::check_quota(&view, "ok.bin", &ctx, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unlimited_space_never_rejects() {
        let (_, view) = quota_view(None);
        let ctx = WriteContext {
            content_length: Some(u64::MAX),
            ..WriteContext::default()
        };
        QuotaPlugin::check_quota(&view, "huge.bin", &ctx, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn total_length_governs_chunked_transfers() {
        let (_, view) = quota_view(Some(100));
        let ctx = WriteContext {
            chunked: true,
            content_length: Some(10),
            total_length: Some(500),
            ..WriteContext::default()
        };
        let err = QuotaPlugin::check_quota(&view, "f.bin-chunking-7-4-0", &ctx, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 507);
    }

    #[tokio::test]
    async fn received_chunk_bytes_are_credited() {
        let (_, view) = quota_view(Some(100));
        let cache = ChunkCache::new();
        let chunk = ChunkName::decode("f.bin-chunking-7-2-0").unwrap();
        cache.store(&chunk, Bytes::from(vec![0u8; 60])).unwrap();

        // 150 declared minus 60 already uploaded fits in 100 free.
        let ctx = WriteContext {
            chunked: true,
            total_length: Some(150),
            ..WriteContext::default()
        };
        QuotaPlugin::check_quota(&view, "f.bin-chunking-7-2-1", &ctx, Some(&cache))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_pass() {
        let (storage, view) = quota_view(Some(1));
        storage.set_available(false);
        let ctx = WriteContext {
            content_length: Some(100),
            ..WriteContext::default()
        };
        QuotaPlugin::check_quota(&view, "f.bin", &ctx, None)
            .await
            .unwrap();
    }
}
