//! Explicit request/response context for write operations.
//!
//! The upload pipeline never reads ambient request state; everything a PUT
//! can carry arrives in a [`WriteContext`] and everything it produces for
//! response headers leaves in a [`WriteOutcome`].

/// Client-supplied write parameters, decoded from request headers.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    /// Legacy chunking flag (`OC-Chunked: 1`).
    pub chunked: bool,
    /// Declared body length, used to verify the stream copy.
    pub content_length: Option<u64>,
    /// Client-desired mtime in epoch seconds (`X-OC-MTime`).
    pub requested_mtime: Option<i64>,
    /// Client checksum, `TYPE:value` (`OC-Checksum`).
    pub checksum: Option<String>,
    /// Expected total size across all chunks (`OC-Total-Length`).
    pub total_length: Option<u64>,
}

impl WriteContext {
    /// The length quota pre-flight should account against.
    pub fn expected_length(&self) -> Option<u64> {
        self.total_length.or(self.content_length)
    }
}

/// What a committed write reports back for response headers.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Quoted etag of the committed state.
    pub etag: String,
    pub file_id: Option<u64>,
    /// Whether the requested mtime was applied (`X-OC-MTime: accepted`).
    pub mtime_accepted: bool,
    /// Stored checksum to echo back.
    pub checksum: Option<String>,
    /// Whether the target existed before this write (204 vs 201).
    pub previously_existed: bool,
}
