//! The WebDAV file-operation pipeline.
//!
//! This crate maps a virtual DAV path hierarchy onto a versioned,
//! lockable, quota-constrained storage backend:
//!
//! - [`ObjectTree`] resolves request paths to memoized [`DavNode`]s, with
//!   subtree eviction after mutations.
//! - [`File::put`] implements atomic upload-then-rename: the body streams
//!   to a part file, and an exclusive-lock window covers exactly the
//!   rename and metadata update, so concurrent readers observe either the
//!   old content or the new, never a partial write.
//! - [`ChunkCache`] reassembles legacy chunked uploads
//!   (`{name}-chunking-{transferid}-{totalchunks}-{index}`).
//! - [`QuotaPlugin`] pre-flights declared upload sizes;
//!   [`SharedLockGuard`]/[`ExclusiveWindow`] encode the
//!   shared→exclusive→shared lock discipline as guards.
//! - [`DavError`] is the closed transport error set; domain errors
//!   translate through one total table.

mod chunking;
mod directory;
mod error;
mod file;
mod locking;
mod node;
mod quota;
mod request;
mod tree;

pub use chunking::{ChunkCache, ChunkName, ChunkStored, resolve_chunk_name};
pub use directory::Directory;
pub use error::{DavError, DavResult};
pub use file::File;
pub use locking::{ExclusiveWindow, SharedLockGuard};
pub use node::{DavNode, Node};
pub use quota::QuotaPlugin;
pub use request::{WriteContext, WriteOutcome};
pub use tree::{NodeCache, ObjectTree};
