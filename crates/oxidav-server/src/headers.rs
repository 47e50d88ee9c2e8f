//! Sync-client protocol headers.
//!
//! Decodes the `OC-*` request headers into a [`WriteContext`] and attaches
//! the response headers clients key on (`ETag`, `OC-ETag`, `OC-FileId`,
//! `X-OC-MTime`, `OC-Checksum`).

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::http::response::Builder;
use hyper::{Request, Response, StatusCode};
use oxidav_files::{WriteContext, WriteOutcome};

/// Legacy chunking flag.
pub const OC_CHUNKED: &str = "oc-chunked";
/// Client-desired mtime, acknowledged with `X-OC-MTime: accepted`.
pub const OC_MTIME: &str = "x-oc-mtime";
/// Client checksum, `TYPE:value`.
pub const OC_CHECKSUM: &str = "oc-checksum";
/// Expected total size across all chunks of a transfer.
pub const OC_TOTAL_LENGTH: &str = "oc-total-length";
pub const OC_ETAG: &str = "oc-etag";
pub const OC_FILE_ID: &str = "oc-fileid";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decode the write-relevant headers of a PUT request.
pub fn write_context_from<B>(req: &Request<B>) -> WriteContext {
    let headers = req.headers();
    WriteContext {
        chunked: header_str(headers, OC_CHUNKED).is_some(),
        content_length: header_str(headers, "content-length").and_then(|v| v.parse().ok()),
        requested_mtime: header_str(headers, OC_MTIME).and_then(|v| v.parse().ok()),
        checksum: header_str(headers, OC_CHECKSUM).map(str::to_string),
        total_length: header_str(headers, OC_TOTAL_LENGTH).and_then(|v| v.parse().ok()),
    }
}

/// Response for a committed write: status plus the etag/id/mtime headers.
pub fn write_response(outcome: &WriteOutcome) -> Response<Full<Bytes>> {
    let status = if outcome.previously_existed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CREATED
    };
    let mut builder = Response::builder().status(status);
    builder = apply_write_headers(builder, outcome);
    builder.body(Full::new(Bytes::new())).expect("static response")
}

/// Attach the write-outcome headers to a response under construction.
pub fn apply_write_headers(mut builder: Builder, outcome: &WriteOutcome) -> Builder {
    if let Ok(etag) = HeaderValue::from_str(&outcome.etag) {
        builder = builder.header("etag", etag.clone());
        builder = builder.header(OC_ETAG, etag);
    }
    if let Some(file_id) = outcome.file_id {
        builder = builder.header(OC_FILE_ID, file_id.to_string());
    }
    if outcome.mtime_accepted {
        builder = builder.header(OC_MTIME, "accepted");
    }
    if let Some(checksum) = &outcome.checksum
        && let Ok(value) = HeaderValue::from_str(checksum)
    {
        builder = builder.header(OC_CHECKSUM, value);
    }
    builder
}

/// Decode a percent-encoded URL path.
pub fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 3 <= bytes.len()
            && let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3])
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Extract the DAV path from a `Destination` header value, which may be an
/// absolute URL or an absolute path.
pub fn destination_path(value: &str) -> Option<String> {
    let path = if let Some(scheme_end) = value.find("://") {
        let rest = &value[scheme_end + 3..];
        let slash = rest.find('/')?;
        &rest[slash..]
    } else {
        value
    };
    if !path.starts_with('/') {
        return None;
    }
    Some(percent_decode(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_decodes_all_oc_headers() {
        let req = Request::builder()
            .header("OC-Chunked", "1")
            .header("Content-Length", "512")
            .header("X-OC-MTime", "1700000000")
            .header("OC-Checksum", "MD5:abc")
            .header("OC-Total-Length", "4096")
            .body(())
            .unwrap();
        let ctx = write_context_from(&req);
        assert!(ctx.chunked);
        assert_eq!(ctx.content_length, Some(512));
        assert_eq!(ctx.requested_mtime, Some(1_700_000_000));
        assert_eq!(ctx.checksum.as_deref(), Some("MD5:abc"));
        assert_eq!(ctx.total_length, Some(4096));
    }

    #[test]
    fn absent_headers_decode_to_defaults() {
        let req = Request::builder().body(()).unwrap();
        let ctx = write_context_from(&req);
        assert!(!ctx.chunked);
        assert!(ctx.content_length.is_none());
        assert!(ctx.checksum.is_none());
    }

    #[test]
    fn percent_decoding_handles_spaces_and_utf8() {
        assert_eq!(percent_decode("/a%20b.txt"), "/a b.txt");
        assert_eq!(percent_decode("/plain.txt"), "/plain.txt");
        assert_eq!(percent_decode("/caf%C3%A9"), "/café");
        // A dangling escape passes through untouched.
        assert_eq!(percent_decode("/x%2"), "/x%2");
    }

    #[test]
    fn destination_accepts_urls_and_paths() {
        assert_eq!(
            destination_path("http://localhost:8080/dst/f.txt").as_deref(),
            Some("/dst/f.txt")
        );
        assert_eq!(destination_path("/dst/f.txt").as_deref(), Some("/dst/f.txt"));
        assert_eq!(destination_path("not-a-path"), None);
    }
}
