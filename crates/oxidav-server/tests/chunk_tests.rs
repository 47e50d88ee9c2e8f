//! Chunked-upload tests over the HTTP surface.
//!
//! Chunk PUTs use the legacy wire protocol: the `OC-Chunked: 1` header
//! plus `{name}-chunking-{transferid}-{totalchunks}-{index}` filenames.

mod common;

use common::TestServer;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

async fn put_chunk(server: &TestServer, name: &str, body: &[u8]) -> reqwest::Response {
    server
        .put_with_headers(name, body.to_vec(), &[("OC-Chunked", "1")])
        .await
}

#[tokio::test]
async fn two_chunk_upload_assembles_on_completion() {
    let server = TestServer::spawn().await;

    let resp = put_chunk(&server, "/big.bin-chunking-42-2-0", b"hello ").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().get("etag").is_none(), "incomplete transfer has no etag");

    // The logical file does not exist until assembly.
    assert_eq!(
        server.get_bytes("/big.bin").await.unwrap_err(),
        StatusCode::NOT_FOUND
    );

    let resp = put_chunk(&server, "/big.bin-chunking-42-2-1", b"world").await;
    assert!(resp.status().is_success());
    let etag = resp.headers().get("etag").expect("assembly returns the etag");
    assert!(etag.to_str().unwrap().starts_with('"'));

    assert_eq!(server.get_bytes("/big.bin").await.unwrap(), b"hello world");
}

#[tokio::test]
async fn chunks_arrive_in_any_order() {
    let server = TestServer::spawn().await;
    let payload: Vec<u8> = (0u8..=255).cycle().take(3000).collect();
    let (a, rest) = payload.split_at(1000);
    let (b, c) = rest.split_at(1000);

    put_chunk(&server, "/data.bin-chunking-7-3-2", c).await;
    put_chunk(&server, "/data.bin-chunking-7-3-0", a).await;
    let resp = put_chunk(&server, "/data.bin-chunking-7-3-1", b).await;
    assert!(resp.headers().contains_key("etag"));

    let assembled = server.get_bytes("/data.bin").await.unwrap();
    assert_eq!(
        Sha256::digest(&assembled),
        Sha256::digest(&payload),
        "assembled bytes must match the original payload"
    );
}

#[tokio::test]
async fn chunked_upload_overwrites_an_existing_file() {
    let server = TestServer::spawn().await;
    server.put_ok("/doc.txt", b"version one".to_vec()).await;

    put_chunk(&server, "/doc.txt-chunking-9-2-0", b"version ").await;
    let resp = put_chunk(&server, "/doc.txt-chunking-9-2-1", b"two").await;
    assert!(resp.status().is_success());

    assert_eq!(server.get_bytes("/doc.txt").await.unwrap(), b"version two");
}

#[tokio::test]
async fn late_chunk_retry_is_accepted_but_ignored() {
    let server = TestServer::spawn().await;
    put_chunk(&server, "/f.bin-chunking-3-2-0", b"aa").await;
    let done = put_chunk(&server, "/f.bin-chunking-3-2-1", b"bb").await;
    let etag = done.headers().get("etag").unwrap().clone();

    // A client that lost the response retries the final chunk.
    let retry = put_chunk(&server, "/f.bin-chunking-3-2-1", b"bb").await;
    assert_eq!(retry.status(), StatusCode::CREATED);
    assert!(retry.headers().get("etag").is_none());

    // Content and version are unchanged.
    assert_eq!(server.get_bytes("/f.bin").await.unwrap(), b"aabb");
    let head = server.head("/f.bin").await;
    assert_eq!(head.headers().get("etag").unwrap(), &etag);
}

#[tokio::test]
async fn stray_index_past_declared_total_is_rejected() {
    let server = TestServer::spawn().await;
    put_chunk(&server, "/g.bin-chunking-4-2-0", b"aa").await;

    let resp = put_chunk(&server, "/g.bin-chunking-4-2-2", b"cc").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // The declared set still completes.
    let resp = put_chunk(&server, "/g.bin-chunking-4-2-1", b"bb").await;
    assert!(resp.headers().contains_key("etag"));
    assert_eq!(server.get_bytes("/g.bin").await.unwrap(), b"aabb");
}

#[tokio::test]
async fn chunked_flag_with_plain_name_is_not_implemented() {
    let server = TestServer::spawn().await;
    let resp = put_chunk(&server, "/plain.txt", b"body").await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn total_length_header_enforces_quota_for_chunked_transfers() {
    let server = TestServer::spawn().await;
    server.storage.set_quota(Some(100));

    let resp = server
        .put_with_headers(
            "/huge.bin-chunking-5-4-0",
            vec![0u8; 10],
            &[("OC-Chunked", "1"), ("OC-Total-Length", "5000")],
        )
        .await;
    assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
}

#[tokio::test]
async fn assembled_transfer_honors_client_mtime() {
    let server = TestServer::spawn().await;
    put_chunk(&server, "/t.bin-chunking-6-2-0", b"aa").await;
    let resp = server
        .put_with_headers(
            "/t.bin-chunking-6-2-1",
            b"bb".to_vec(),
            &[("OC-Chunked", "1"), ("X-OC-MTime", "1600000000")],
        )
        .await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("x-oc-mtime").unwrap().to_str().unwrap(),
        "accepted"
    );
}
