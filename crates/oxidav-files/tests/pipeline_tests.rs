//! End-to-end pipeline tests over the in-memory storage backend.

use bytes::Bytes;
use oxidav_files::{ChunkCache, DavError, ObjectTree, SharedLockGuard, WriteContext};
use oxidav_storage::{
    LockKind, LockManager, LockOp, MemoryLockManager, MemoryStorage, Permissions,
    RecordingLockManager, Storage, StorageView,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn setup() -> (Arc<MemoryStorage>, Arc<StorageView>, ChunkCache) {
    let storage = MemoryStorage::new("home");
    let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
    let view = Arc::new(StorageView::new(storage.clone(), locks));
    (storage, view, ChunkCache::new())
}

fn recording_setup() -> (
    Arc<RecordingLockManager>,
    Arc<StorageView>,
    ChunkCache,
) {
    let storage = MemoryStorage::new("home");
    let locks = Arc::new(RecordingLockManager::new());
    let locks_dyn: Arc<dyn LockManager> = locks.clone();
    let view = Arc::new(StorageView::new(storage, locks_dyn));
    (locks, view, ChunkCache::new())
}

async fn put_file(
    view: &Arc<StorageView>,
    chunks: &ChunkCache,
    path: &str,
    body: &'static [u8],
) -> String {
    let tree = ObjectTree::open(Arc::clone(view)).await.unwrap();
    let parent = path.rsplit_once('/').map_or("", |(p, _)| p);
    let name = path.rsplit('/').next().unwrap();
    let dir_node = tree.get_node_for_path(parent).await.unwrap();
    let dir = dir_node.as_directory().unwrap();
    let ctx = WriteContext {
        content_length: Some(body.len() as u64),
        ..WriteContext::default()
    };
    let outcome = dir
        .create_file(name, &ctx, Bytes::from_static(body), chunks)
        .await
        .unwrap()
        .expect("non-chunked put always completes");
    outcome.etag
}

// ============================================================================
// Tree resolution
// ============================================================================

#[tokio::test]
async fn tree_returns_one_node_instance_per_path() {
    let (_, view, chunks) = setup();
    put_file(&view, &chunks, "report.txt", b"hello").await;

    let tree = ObjectTree::open(view).await.unwrap();
    let first = tree.get_node_for_path("/report.txt").await.unwrap();
    let second = tree.get_node_for_path("report.txt/").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    tree.mark_dirty("report.txt");
    let third = tree.get_node_for_path("report.txt").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[tokio::test]
async fn mark_dirty_evicts_the_whole_subtree() {
    let (_, view, chunks) = setup();
    view.mkdir("docs").await.unwrap();
    view.mkdir("docs2").await.unwrap();
    put_file(&view, &chunks, "docs/a.txt", b"a").await;
    put_file(&view, &chunks, "docs2/b.txt", b"b").await;

    let tree = ObjectTree::open(view).await.unwrap();
    let stale = tree.get_node_for_path("docs/a.txt").await.unwrap();
    let unrelated = tree.get_node_for_path("docs2/b.txt").await.unwrap();

    tree.mark_dirty("docs");
    let fresh = tree.get_node_for_path("docs/a.txt").await.unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));

    // A sibling prefix ("docs2" starts with "docs") must survive.
    let survivor = tree.get_node_for_path("docs2/b.txt").await.unwrap();
    assert!(Arc::ptr_eq(&unrelated, &survivor));
}

#[tokio::test]
async fn uninitialized_tree_is_service_unavailable() {
    let tree = ObjectTree::uninitialized();
    let err = tree.get_node_for_path("anything").await.unwrap_err();
    assert!(matches!(err, DavError::ServiceUnavailable(_)));
    assert_eq!(err.status(), 503);
}

#[tokio::test]
async fn missing_path_is_not_found_and_traversal_is_invalid() {
    let (_, view, _) = setup();
    let tree = ObjectTree::open(view).await.unwrap();

    let err = tree.get_node_for_path("nope.txt").await.unwrap_err();
    assert!(matches!(err, DavError::NotFound(_)));

    let err = tree.get_node_for_path("docs/../etc").await.unwrap_err();
    assert!(matches!(err, DavError::InvalidPath(_)));
}

#[tokio::test]
async fn offline_storage_resolves_to_service_unavailable() {
    let (storage, view, chunks) = setup();
    put_file(&view, &chunks, "a.txt", b"x").await;

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    storage.set_available(false);

    let err = tree.get_node_for_path("a.txt").await.unwrap_err();
    assert!(matches!(err, DavError::ServiceUnavailable(_)));

    // An offline backend also fails tree construction itself.
    let err = ObjectTree::open(view).await.unwrap_err();
    assert!(matches!(err, DavError::ServiceUnavailable(_)));
}

#[tokio::test]
async fn part_files_resolve_through_raw_stat() {
    let (_, view, _) = setup();
    view.write_stream("upload.ocTransferId9.part", Bytes::from_static(b"body"))
        .await
        .unwrap();

    let tree = ObjectTree::open(view).await.unwrap();
    let node = tree
        .get_node_for_path("upload.ocTransferId9.part")
        .await
        .unwrap();
    let info = node.info();
    assert!(info.file_id.is_none());
    assert!(info.etag.is_none());
    assert_eq!(info.size, 4);
    assert_eq!(info.permissions, Permissions::ALL);
}

#[tokio::test]
async fn chunk_encoded_names_resolve_to_their_target() {
    let (_, view, chunks) = setup();
    put_file(&view, &chunks, "movie.mp4", b"frames").await;

    let tree = ObjectTree::open(view).await.unwrap();
    let node = tree
        .get_node_for_path("movie.mp4-chunking-77-5-0")
        .await
        .unwrap();
    assert_eq!(node.path(), "movie.mp4");

    // The target's cached instance is shared with direct resolution.
    let direct = tree.get_node_for_path("movie.mp4").await.unwrap();
    assert!(Arc::ptr_eq(&node, &direct));
}

// ============================================================================
// File::put
// ============================================================================

#[tokio::test]
async fn put_creates_then_get_round_trips() {
    let (_, view, chunks) = setup();
    view.mkdir("docs").await.unwrap();
    let etag = put_file(&view, &chunks, "docs/report.txt", b"hello").await;
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("docs/report.txt").await.unwrap();
    let file = node.as_file().unwrap();
    assert_eq!(file.get().await.unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(node.info().size, 5);
    assert!(node.info().file_id.is_some());
}

#[tokio::test]
async fn sequential_puts_leave_only_the_second_body() {
    let (_, view, chunks) = setup();
    let first_etag = put_file(&view, &chunks, "note.txt", b"first").await;
    let second_etag = put_file(&view, &chunks, "note.txt", b"second body").await;
    assert_ne!(first_etag, second_etag);

    assert_eq!(
        view.read_file("note.txt").await.unwrap(),
        Bytes::from_static(b"second body")
    );

    // No part file leaked into the listing.
    let listing = view.get_directory_content("").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, "note.txt");
}

#[tokio::test]
async fn put_to_non_updatable_target_is_forbidden_and_leaves_no_lock() {
    let (storage, view, chunks) = setup();
    put_file(&view, &chunks, "locked.txt", b"original").await;
    storage.set_permissions("locked.txt", Permissions::ALL.without(Permissions::UPDATE));

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("locked.txt").await.unwrap();
    let file = node.as_file().unwrap();

    let guard = SharedLockGuard::acquire(&view, "locked.txt").unwrap();
    let err = file
        .put(
            &WriteContext::default(),
            Bytes::from_static(b"overwrite"),
            &chunks,
        )
        .await
        .unwrap_err();
    guard.release();

    assert!(matches!(err, DavError::Forbidden { .. }));
    assert_eq!(
        view.read_file("locked.txt").await.unwrap(),
        Bytes::from_static(b"original")
    );
    // No stale lock: a different caller can take the exclusive lock.
    view.lock_file("locked.txt", LockKind::Exclusive).unwrap();
}

#[tokio::test]
async fn content_length_mismatch_is_bad_request_and_cleans_up() {
    let (storage, view, chunks) = setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let ctx = WriteContext {
        content_length: Some(10),
        ..WriteContext::default()
    };
    let err = dir
        .create_file("short.txt", &ctx, Bytes::from_static(b"abc"), &chunks)
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::BadRequest(_)));

    // Nothing visible, nothing staged.
    assert!(view.get_file_info("short.txt").await.unwrap().is_none());
    assert!(!storage.file_exists("short.txt").await.unwrap());
    let listing = view.get_directory_content("").await.unwrap();
    assert!(listing.is_empty());
}

#[tokio::test]
async fn put_observes_exact_lock_escalation_sequence() {
    let (locks, view, chunks) = recording_setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    dir.create_file(
        "seq.txt",
        &WriteContext::default(),
        Bytes::from_static(b"body"),
        &chunks,
    )
    .await
    .unwrap();

    assert_eq!(
        locks.ops_for("seq.txt"),
        vec![
            LockOp::Acquire("seq.txt".to_string(), LockKind::Shared),
            LockOp::Change("seq.txt".to_string(), LockKind::Exclusive),
            LockOp::Change("seq.txt".to_string(), LockKind::Shared),
            LockOp::Release("seq.txt".to_string(), LockKind::Shared),
        ]
    );
}

#[tokio::test]
async fn concurrent_writer_loses_at_the_escalation_step() {
    let (_, view, chunks) = setup();
    put_file(&view, &chunks, "contended.txt", b"old").await;

    // Another writer holds a shared lock on the same path.
    view.lock_file("contended.txt", LockKind::Shared).unwrap();

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("contended.txt").await.unwrap();
    let file = node.as_file().unwrap();

    let guard = SharedLockGuard::acquire(&view, "contended.txt").unwrap();
    let err = file
        .put(
            &WriteContext::default(),
            Bytes::from_static(b"new"),
            &chunks,
        )
        .await
        .unwrap_err();
    guard.release();

    assert!(matches!(err, DavError::FileLocked(_)));
    assert_eq!(err.status(), 423);
    // The loser must not have corrupted the target.
    assert_eq!(
        view.read_file("contended.txt").await.unwrap(),
        Bytes::from_static(b"old")
    );
}

#[tokio::test]
async fn client_mtime_is_applied_and_acknowledged() {
    let (_, view, chunks) = setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let ctx = WriteContext {
        requested_mtime: Some(1_234_567_890),
        ..WriteContext::default()
    };
    let outcome = dir
        .create_file("stamped.txt", &ctx, Bytes::from_static(b"x"), &chunks)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.mtime_accepted);

    let info = view.get_file_info("stamped.txt").await.unwrap().unwrap();
    assert_eq!(
        info.mtime,
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_234_567_890)
    );
}

#[tokio::test]
async fn checksum_is_persisted_then_cleared_by_checksumless_write() {
    let (_, view, chunks) = setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let ctx = WriteContext {
        checksum: Some("SHA1:2aae6c35c94fcfb415dbe95f408b9ce91ee846ed".to_string()),
        ..WriteContext::default()
    };
    let outcome = dir
        .create_file("sum.txt", &ctx, Bytes::from_static(b"hello world"), &chunks)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome.checksum.as_deref(),
        Some("SHA1:2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
    );

    // A later write without a checksum clears the stale one.
    let etag = put_file(&view, &chunks, "sum.txt", b"changed").await;
    assert!(!etag.is_empty());
    let info = view.get_file_info("sum.txt").await.unwrap().unwrap();
    assert!(info.checksum.is_none());
}

#[tokio::test]
async fn unreadable_encrypted_file_reads_as_service_unavailable() {
    let (storage, view, chunks) = setup();
    put_file(&view, &chunks, "secret.bin", b"ciphertext").await;
    storage.mark_encrypted_unreadable("secret.bin");

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("secret.bin").await.unwrap();
    let err = node.as_file().unwrap().get().await.unwrap_err();
    assert!(matches!(err, DavError::ServiceUnavailable(_)));
    assert_eq!(err.status(), 503);
}

#[tokio::test]
async fn direct_write_storage_skips_part_file_staging() {
    let storage = MemoryStorage::new_direct_write("direct");
    let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
    let view = Arc::new(StorageView::new(storage, locks));
    let chunks = ChunkCache::new();

    let etag = put_file(&view, &chunks, "direct.txt", b"payload").await;
    assert!(etag.starts_with('"'));
    assert_eq!(
        view.read_file("direct.txt").await.unwrap(),
        Bytes::from_static(b"payload")
    );
}

#[tokio::test]
async fn hook_veto_surfaces_as_forbidden_with_retry_hint_and_cleans_up() {
    struct ScannerHook;
    impl oxidav_storage::WriteHook for ScannerHook {
        fn pre_write(&self, path: &str, _exists: bool) -> Result<(), oxidav_storage::HookVeto> {
            if path.ends_with(".exe") {
                return Err(oxidav_storage::HookVeto::Forbidden {
                    message: "scan pending, try again".to_string(),
                    retry: true,
                });
            }
            Ok(())
        }
    }

    let storage = MemoryStorage::new("home");
    let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
    let mut raw_view = StorageView::new(storage.clone(), locks);
    raw_view.register_hook(Arc::new(ScannerHook));
    let view = Arc::new(raw_view);
    let chunks = ChunkCache::new();

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let err = dir
        .create_file(
            "tool.exe",
            &WriteContext::default(),
            Bytes::from_static(b"MZ"),
            &chunks,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::Forbidden { retry: true, .. }));
    assert!(err.retryable());

    // The vetoed upload left nothing behind, staged or visible.
    assert!(!storage.file_exists("tool.exe").await.unwrap());
    assert!(view.get_directory_content("").await.unwrap().is_empty());

    // An allowed name passes the same hook.
    let outcome = dir
        .create_file(
            "tool.txt",
            &WriteContext::default(),
            Bytes::from_static(b"ok"),
            &chunks,
        )
        .await
        .unwrap();
    assert!(outcome.is_some());
}

// ============================================================================
// Chunked uploads
// ============================================================================

async fn put_chunk(
    view: &Arc<StorageView>,
    chunks: &ChunkCache,
    name: &str,
    body: &'static [u8],
    total_length: Option<u64>,
) -> Result<Option<String>, DavError> {
    let tree = ObjectTree::open(Arc::clone(view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();
    let ctx = WriteContext {
        chunked: true,
        content_length: Some(body.len() as u64),
        total_length,
        ..WriteContext::default()
    };
    let outcome = dir
        .create_file(name, &ctx, Bytes::from_static(body), chunks)
        .await?;
    Ok(outcome.map(|o| o.etag))
}

#[tokio::test]
async fn chunked_upload_assembles_in_declared_order() {
    let (_, view, chunks) = setup();

    // Second chunk first: accepted, not complete.
    let r = put_chunk(&view, &chunks, "big.bin-chunking-11-2-1", b"world", None)
        .await
        .unwrap();
    assert!(r.is_none());
    assert!(view.get_file_info("big.bin").await.unwrap().is_none());

    // First chunk completes the transfer and assembles.
    let etag = put_chunk(&view, &chunks, "big.bin-chunking-11-2-0", b"hello ", None)
        .await
        .unwrap()
        .expect("assembly returns the final etag");
    assert!(etag.starts_with('"'));

    assert_eq!(
        view.read_file("big.bin").await.unwrap(),
        Bytes::from_static(b"hello world")
    );
}

#[tokio::test]
async fn stray_chunk_index_beyond_declared_total_is_rejected() {
    let (_, view, chunks) = setup();
    put_chunk(&view, &chunks, "c.bin-chunking-5-2-0", b"aa", None)
        .await
        .unwrap();

    // Index 2 of a 2-chunk transfer can never count toward completion.
    let err = put_chunk(&view, &chunks, "c.bin-chunking-5-2-2", b"cc", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::BadRequest(_)));

    // The transfer still completes with the declared set.
    let etag = put_chunk(&view, &chunks, "c.bin-chunking-5-2-1", b"bb", None)
        .await
        .unwrap();
    assert!(etag.is_some());
}

#[tokio::test]
async fn late_chunk_after_assembly_is_ignored() {
    let (_, view, chunks) = setup();
    put_chunk(&view, &chunks, "d.bin-chunking-6-2-0", b"aa", None)
        .await
        .unwrap();
    let etag = put_chunk(&view, &chunks, "d.bin-chunking-6-2-1", b"bb", None)
        .await
        .unwrap()
        .unwrap();

    // A retried chunk for the finished transfer changes nothing.
    let r = put_chunk(&view, &chunks, "d.bin-chunking-6-2-1", b"bb", None)
        .await
        .unwrap();
    assert!(r.is_none());
    assert_eq!(
        view.read_file("d.bin").await.unwrap(),
        Bytes::from_static(b"aabb")
    );
    let info = view.get_file_info("d.bin").await.unwrap().unwrap();
    assert_eq!(info.quoted_etag().unwrap(), etag);
}

#[tokio::test]
async fn chunk_with_wrong_length_is_discarded() {
    let (_, view, chunks) = setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let ctx = WriteContext {
        chunked: true,
        content_length: Some(99),
        ..WriteContext::default()
    };
    let err = dir
        .create_file(
            "e.bin-chunking-8-2-0",
            &ctx,
            Bytes::from_static(b"aa"),
            &chunks,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::BadRequest(_)));

    // The discarded chunk does not count toward completion.
    let r = put_chunk(&view, &chunks, "e.bin-chunking-8-2-1", b"bb", None)
        .await
        .unwrap();
    assert!(r.is_none());
}

#[tokio::test]
async fn garbled_chunk_name_with_chunked_flag_is_not_implemented() {
    let (_, view, chunks) = setup();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    let dir = root.as_directory().unwrap();

    let ctx = WriteContext {
        chunked: true,
        ..WriteContext::default()
    };
    let err = dir
        .create_file("plain.txt", &ctx, Bytes::from_static(b"zz"), &chunks)
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::NotImplemented(_)));
}

#[tokio::test]
async fn chunked_overwrite_of_updatable_file_in_readonly_dir_is_allowed() {
    let (storage, view, chunks) = setup();
    view.mkdir("inbox").await.unwrap();
    put_file(&view, &chunks, "inbox/doc.txt", b"v1").await;
    // Directory allows no creation, but the target file stays updatable.
    storage.set_permissions("inbox", Permissions::ALL.without(Permissions::CREATE));

    put_chunk_in_dir(&view, &chunks, "inbox", "doc.txt-chunking-3-2-0", b"V")
        .await
        .unwrap();
    let etag = put_chunk_in_dir(&view, &chunks, "inbox", "doc.txt-chunking-3-2-1", b"2")
        .await
        .unwrap();
    assert!(etag.is_some());
    assert_eq!(
        view.read_file("inbox/doc.txt").await.unwrap(),
        Bytes::from_static(b"V2")
    );
}

async fn put_chunk_in_dir(
    view: &Arc<StorageView>,
    chunks: &ChunkCache,
    dir_path: &str,
    name: &str,
    body: &'static [u8],
) -> Result<Option<String>, DavError> {
    let tree = ObjectTree::open(Arc::clone(view)).await.unwrap();
    let dir_node = tree.get_node_for_path(dir_path).await.unwrap();
    let dir = dir_node.as_directory().unwrap();
    let ctx = WriteContext {
        chunked: true,
        content_length: Some(body.len() as u64),
        ..WriteContext::default()
    };
    let outcome = dir
        .create_file(name, &ctx, Bytes::from_static(body), chunks)
        .await?;
    Ok(outcome.map(|o| o.etag))
}

// ============================================================================
// Directory operations
// ============================================================================

#[tokio::test]
async fn listing_populates_the_shared_cache_transitively() {
    let (_, view, chunks) = setup();
    view.mkdir("docs").await.unwrap();
    put_file(&view, &chunks, "docs/a.txt", b"a").await;
    put_file(&view, &chunks, "docs/b.txt", b"b").await;

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let dir_node = tree.get_node_for_path("docs").await.unwrap();
    let dir = dir_node.as_directory().unwrap();

    let children = dir.get_children().await.unwrap();
    assert_eq!(children.len(), 2);

    // Sibling lookups now hit the cache: same instances.
    let a = tree.get_node_for_path("docs/a.txt").await.unwrap();
    assert!(children.iter().any(|c| Arc::ptr_eq(c, &a)));

    // The per-instance memo returns the identical vector.
    let again = dir.get_children().await.unwrap();
    assert!(Arc::ptr_eq(&children[0], &again[0]));
}

#[tokio::test]
async fn create_directory_requires_create_permission() {
    let (storage, view, _) = setup();
    view.mkdir("readonly").await.unwrap();
    storage.set_permissions("readonly", Permissions::READ);

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("readonly").await.unwrap();
    let dir = node.as_directory().unwrap();

    let err = dir.create_directory("sub").await.unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));

    let root = tree.get_node_for_path("").await.unwrap();
    root.as_directory()
        .unwrap()
        .create_directory("writable")
        .await
        .unwrap();
    assert!(view.get_file_info("writable").await.unwrap().is_some());
}

#[tokio::test]
async fn root_and_non_deletable_directories_refuse_delete() {
    let (storage, view, _) = setup();
    view.mkdir("keep").await.unwrap();
    storage.set_permissions("keep", Permissions::ALL.without(Permissions::DELETE));

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let root = tree.get_node_for_path("").await.unwrap();
    assert!(matches!(
        root.as_directory().unwrap().delete().await.unwrap_err(),
        DavError::Forbidden { .. }
    ));

    let keep = tree.get_node_for_path("keep").await.unwrap();
    assert!(matches!(
        keep.as_directory().unwrap().delete().await.unwrap_err(),
        DavError::Forbidden { .. }
    ));
}

#[tokio::test]
async fn quota_info_degrades_to_zeros_when_storage_is_gone() {
    let (storage, view, _) = setup();
    view.mkdir("docs").await.unwrap();
    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let node = tree.get_node_for_path("docs").await.unwrap();
    let dir = node.as_directory().unwrap();

    storage.set_available(false);
    let quota = dir.quota_info().await;
    assert_eq!(quota.used, 0);
    assert_eq!(quota.free, oxidav_storage::FreeSpace::Bytes(0));
}

// ============================================================================
// Tree copy / move
// ============================================================================

#[tokio::test]
async fn copy_requires_destination_parent_write_permission() {
    let (storage, view, chunks) = setup();
    put_file(&view, &chunks, "src.txt", b"data").await;
    view.mkdir("sealed").await.unwrap();
    storage.set_permissions("sealed", Permissions::READ);

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    let err = tree.copy("src.txt", "sealed/dst.txt").await.unwrap_err();
    assert!(matches!(err, DavError::Forbidden { .. }));

    tree.copy("src.txt", "copy.txt").await.unwrap();
    assert_eq!(
        view.read_file("copy.txt").await.unwrap(),
        Bytes::from_static(b"data")
    );
    // Source is untouched.
    assert_eq!(
        view.read_file("src.txt").await.unwrap(),
        Bytes::from_static(b"data")
    );
}

#[tokio::test]
async fn copy_evicts_the_destination_subtree() {
    let (_, view, chunks) = setup();
    view.mkdir("dst").await.unwrap();
    put_file(&view, &chunks, "src.txt", b"fresh").await;

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    // Warm the cache with the destination directory.
    let warm = tree.get_node_for_path("dst").await.unwrap();

    tree.copy("src.txt", "dst/src.txt").await.unwrap();

    let fresh = tree.get_node_for_path("dst").await.unwrap();
    assert!(!Arc::ptr_eq(&warm, &fresh));
    let copied = tree.get_node_for_path("dst/src.txt").await.unwrap();
    assert_eq!(copied.info().size, 5);
}

#[tokio::test]
async fn move_renames_and_evicts_both_subtrees() {
    let (_, view, chunks) = setup();
    view.mkdir("from").await.unwrap();
    view.mkdir("to").await.unwrap();
    put_file(&view, &chunks, "from/f.txt", b"payload").await;

    let tree = ObjectTree::open(Arc::clone(&view)).await.unwrap();
    tree.move_node("from/f.txt", "to/f.txt").await.unwrap();

    assert!(view.get_file_info("from/f.txt").await.unwrap().is_none());
    let moved = tree.get_node_for_path("to/f.txt").await.unwrap();
    assert_eq!(moved.info().size, 7);
}
