//! Shared test server harness.

#![allow(dead_code)] // Not every suite uses every helper.

use oxidav_server::{DavServer, DavState, ServerConfig};
use oxidav_storage::{
    LocalStorage, LockManager, MemoryLockManager, MemoryStorage, StorageView,
};
use reqwest::{Method, Response, StatusCode};
use std::sync::Arc;

/// A DAV server on an ephemeral port plus handles into its internals.
pub struct TestServer {
    server: DavServer,
    client: reqwest::Client,
    /// Backend handle for fault injection and permission overrides.
    pub storage: Arc<MemoryStorage>,
    /// View handle for direct lock/content manipulation.
    pub view: Arc<StorageView>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let storage = MemoryStorage::new("test");
        let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
        let view = Arc::new(StorageView::new(storage.clone(), locks));
        let state = DavState::new(Arc::clone(&view));
        let server = DavServer::start(state, ServerConfig::default())
            .await
            .expect("server starts on an ephemeral port");
        Self {
            server,
            client: reqwest::Client::new(),
            storage,
            view,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.url(), path)
    }

    /// Spawn a server over a local directory instead of memory. The
    /// `storage` handle still points at a throwaway memory backend; use
    /// the returned tempdir to inspect on-disk state.
    pub async fn spawn_local() -> (Self, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let local = LocalStorage::new("local", dir.path()).expect("local storage opens");
        let locks: Arc<dyn LockManager> = Arc::new(MemoryLockManager::new());
        let view = Arc::new(StorageView::new(local, locks));
        let state = DavState::new(Arc::clone(&view));
        let server = DavServer::start(state, ServerConfig::default())
            .await
            .expect("server starts on an ephemeral port");
        (
            Self {
                server,
                client: reqwest::Client::new(),
                storage: MemoryStorage::new("unused"),
                view,
            },
            dir,
        )
    }

    pub async fn put(&self, path: &str, body: Vec<u8>) -> Response {
        self.client
            .put(self.url(path))
            .body(body)
            .send()
            .await
            .expect("request completes")
    }

    pub async fn put_with_headers(
        &self,
        path: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut req = self.client.put(self.url(path)).body(body);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        req.send().await.expect("request completes")
    }

    pub async fn put_ok(&self, path: &str, body: Vec<u8>) -> Response {
        let resp = self.put(path, body).await;
        assert!(
            resp.status().is_success(),
            "PUT {path} failed with {}",
            resp.status()
        );
        resp
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("request completes")
    }

    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, StatusCode> {
        let resp = self.get(path).await;
        if resp.status().is_success() {
            Ok(resp.bytes().await.expect("body reads").to_vec())
        } else {
            Err(resp.status())
        }
    }

    pub async fn head(&self, path: &str) -> Response {
        self.client
            .head(self.url(path))
            .send()
            .await
            .expect("request completes")
    }

    pub async fn mkcol(&self, path: &str) -> Response {
        self.client
            .request(Method::from_bytes(b"MKCOL").unwrap(), self.url(path))
            .send()
            .await
            .expect("request completes")
    }

    pub async fn mkcol_ok(&self, path: &str) {
        let resp = self.mkcol(path).await;
        assert_eq!(resp.status(), StatusCode::CREATED, "MKCOL {path}");
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("request completes")
    }

    pub async fn move_to(&self, from: &str, to: &str, overwrite: bool) -> Response {
        self.client
            .request(Method::from_bytes(b"MOVE").unwrap(), self.url(from))
            .header("Destination", self.url(to))
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await
            .expect("request completes")
    }

    pub async fn copy_to(&self, from: &str, to: &str, overwrite: bool) -> Response {
        self.client
            .request(Method::from_bytes(b"COPY").unwrap(), self.url(from))
            .header("Destination", self.url(to))
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await
            .expect("request completes")
    }
}
