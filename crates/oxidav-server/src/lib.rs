//! HTTP surface for the oxidav file pipeline.
//!
//! Routes the WebDAV file methods (GET/HEAD/PUT/MKCOL/DELETE/COPY/MOVE)
//! into [`oxidav_files`], speaking the sync-client header protocol
//! (`OC-Chunked`, `X-OC-MTime`, `OC-Checksum`, `OC-Total-Length`) on the
//! way in and attaching etag/file-id headers on the way out.
//!
//! Property storage (PROPFIND/PROPPATCH) and WebDAV LOCK tokens are
//! outside this crate's scope; advisory locking happens server-side in
//! the pipeline.

mod handler;
mod headers;
mod server;

pub use handler::{DavState, handle};
pub use headers::{
    OC_CHECKSUM, OC_CHUNKED, OC_ETAG, OC_FILE_ID, OC_MTIME, OC_TOTAL_LENGTH, destination_path,
    percent_decode, write_context_from,
};
pub use server::{DavServer, ServerConfig};
