//! Method routing into the file pipeline.
//!
//! One request = one [`ObjectTree`]; the node cache lives and dies with
//! the request. The chunk cache and the storage view are the only shared
//! state, injected through [`DavState`].

use crate::headers::{
    destination_path, percent_decode, write_context_from, write_response,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use oxidav_files::{
    ChunkCache, DavError, DavResult, ObjectTree, QuotaPlugin, SharedLockGuard,
};
use oxidav_storage::{StorageView, normalize_path, view_parent};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Shared server state.
#[derive(Clone)]
pub struct DavState {
    pub view: Arc<StorageView>,
    pub chunks: Arc<ChunkCache>,
}

impl DavState {
    pub fn new(view: Arc<StorageView>) -> Self {
        Self {
            view,
            chunks: Arc::new(ChunkCache::new()),
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.into())))
        .expect("static response")
}

fn error_response(err: &DavError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8");
    if matches!(err, DavError::ServiceUnavailable(_)) {
        builder = builder.header("retry-after", "10");
    }
    builder
        .body(Full::new(Bytes::from(err.to_string())))
        .expect("static response")
}

/// Handle one request.
#[instrument(level = "debug", skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
pub async fn handle(state: DavState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let result = match method {
        Method::OPTIONS => Ok(options_response()),
        Method::GET => get(&state, req, true).await,
        Method::HEAD => get(&state, req, false).await,
        Method::PUT => put(&state, req).await,
        Method::DELETE => delete(&state, req).await,
        _ => match method.as_str() {
            "MKCOL" => mkcol(&state, req).await,
            "COPY" => copy_or_move(&state, req, false).await,
            "MOVE" => copy_or_move(&state, req, true).await,
            _ => Ok(text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not supported",
            )),
        },
    };
    match result {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, status = err.status(), "request failed");
            error_response(&err)
        }
    }
}

fn options_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("dav", "1")
        .header("allow", "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE")
        .body(Full::new(Bytes::new()))
        .expect("static response")
}

fn request_path<B>(req: &Request<B>) -> String {
    normalize_path(&percent_decode(req.uri().path()))
}

async fn open_tree(state: &DavState) -> DavResult<ObjectTree> {
    ObjectTree::open(Arc::clone(&state.view)).await
}

async fn get(
    state: &DavState,
    req: Request<Incoming>,
    with_body: bool,
) -> DavResult<Response<Full<Bytes>>> {
    let path = request_path(&req);
    let tree = open_tree(state).await?;
    let node = tree.get_node_for_path(&path).await?;

    let Some(file) = node.as_file() else {
        return Err(DavError::forbidden("cannot GET a collection"));
    };
    let info = node.info();
    let content = file.get().await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", info.mime_type.clone())
        .header("content-length", content.len().to_string());
    if let Some(etag) = info.quoted_etag() {
        builder = builder.header("etag", etag);
    }
    if let Some(file_id) = info.file_id {
        builder = builder.header(crate::headers::OC_FILE_ID, file_id.to_string());
    }
    let body = if with_body { content } else { Bytes::new() };
    Ok(builder.body(Full::new(body)).expect("static response"))
}

async fn put(state: &DavState, req: Request<Incoming>) -> DavResult<Response<Full<Bytes>>> {
    let path = request_path(&req);
    if path.is_empty() {
        return Err(DavError::forbidden("cannot PUT to the root"));
    }
    let ctx = write_context_from(&req);
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|err| DavError::BadRequest(format!("could not read request body: {err}")))?
        .to_bytes();

    let tree = open_tree(state).await?;
    QuotaPlugin::check_quota(&state.view, &path, &ctx, Some(&state.chunks)).await?;

    // PUT onto an existing plain file runs on the resolved node, under the
    // request-scoped shared lock. Everything else (new files, chunked
    // uploads) funnels through the parent directory's create path, which
    // takes its own lock.
    let existing = match tree.get_node_for_path(&path).await {
        Ok(node) => Some(node),
        Err(DavError::NotFound(_)) => None,
        Err(err) => return Err(err),
    };

    let outcome = match existing {
        Some(node) if node.is_dir() => {
            return Err(DavError::Conflict("cannot PUT to a collection".to_string()));
        }
        Some(node) if !ctx.chunked => {
            let file = node.as_file().expect("checked above");
            let guard = SharedLockGuard::acquire(&state.view, node.path())?;
            let outcome = file.put(&ctx, body, &state.chunks).await?;
            guard.release();
            outcome
        }
        _ => {
            let parent = view_parent(&path).to_string();
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let parent_node = match tree.get_node_for_path(&parent).await {
                Ok(node) => node,
                Err(DavError::NotFound(_)) => {
                    return Err(DavError::Conflict(format!(
                        "parent collection {parent} does not exist"
                    )));
                }
                Err(err) => return Err(err),
            };
            let Some(dir) = parent_node.as_directory() else {
                return Err(DavError::Conflict(format!(
                    "{parent} is not a collection"
                )));
            };
            dir.create_file(&name, &ctx, body, &state.chunks).await?
        }
    };

    Ok(match outcome {
        Some(outcome) => write_response(&outcome),
        // Chunk accepted, transfer incomplete.
        None => text_response(StatusCode::CREATED, ""),
    })
}

async fn mkcol(state: &DavState, req: Request<Incoming>) -> DavResult<Response<Full<Bytes>>> {
    let path = request_path(&req);
    if path.is_empty() {
        return Err(DavError::AlreadyExists("the root exists".to_string()));
    }
    let tree = open_tree(state).await?;
    if tree.node_exists(&path).await? {
        return Err(DavError::AlreadyExists(format!("{path} already exists")));
    }

    let parent = view_parent(&path).to_string();
    let name = path.rsplit('/').next().unwrap_or(&path).to_string();
    let parent_node = match tree.get_node_for_path(&parent).await {
        Ok(node) => node,
        Err(DavError::NotFound(_)) => {
            return Err(DavError::Conflict(format!(
                "parent collection {parent} does not exist"
            )));
        }
        Err(err) => return Err(err),
    };
    let Some(dir) = parent_node.as_directory() else {
        return Err(DavError::Conflict(format!("{parent} is not a collection")));
    };

    let guard = SharedLockGuard::acquire(&state.view, &path)?;
    let result = dir.create_directory(&name).await;
    guard.release();
    result?;

    Ok(text_response(StatusCode::CREATED, ""))
}

async fn delete(state: &DavState, req: Request<Incoming>) -> DavResult<Response<Full<Bytes>>> {
    let path = request_path(&req);
    let tree = open_tree(state).await?;
    let node = tree.get_node_for_path(&path).await?;

    let guard = SharedLockGuard::acquire(&state.view, &path)?;
    let result = match node.as_ref() {
        oxidav_files::DavNode::File(file) => file.delete().await,
        oxidav_files::DavNode::Directory(dir) => dir.delete().await,
    };
    guard.release();
    result?;

    tree.mark_dirty(&path);
    Ok(text_response(StatusCode::NO_CONTENT, ""))
}

async fn copy_or_move(
    state: &DavState,
    req: Request<Incoming>,
    is_move: bool,
) -> DavResult<Response<Full<Bytes>>> {
    let source = request_path(&req);
    let destination = req
        .headers()
        .get("destination")
        .and_then(|v| v.to_str().ok())
        .and_then(destination_path)
        .ok_or_else(|| DavError::BadRequest("missing or invalid Destination header".into()))?;
    let destination = normalize_path(&destination);
    if destination == source {
        return Err(DavError::forbidden("source and destination are the same"));
    }
    let overwrite = req
        .headers()
        .get("overwrite")
        .and_then(|v| v.to_str().ok())
        .is_none_or(|v| !v.eq_ignore_ascii_case("f"));

    let tree = open_tree(state).await?;
    let destination_existed = tree.node_exists(&destination).await?;
    if destination_existed && !overwrite {
        return Err(DavError::PreconditionFailed(format!(
            "{destination} exists and overwrite is disabled"
        )));
    }

    let guard = SharedLockGuard::acquire(&state.view, &source)?;
    let result = if is_move {
        tree.move_node(&source, &destination).await
    } else {
        tree.copy(&source, &destination).await
    };
    guard.release();
    if let Err(err) = result {
        warn!(%source, %destination, %err, "copy/move failed");
        return Err(err);
    }

    Ok(text_response(
        if destination_existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        },
        "",
    ))
}
