//! HTTP/1.0 response preamble, built once at startup.

/// Preamble for a `200 OK` carrying `content_length` bytes of `mimetype`.
///
/// Lines end in a bare `\n`; clients receive exactly these bytes.
pub fn build(mimetype: &str, content_length: u64) -> Vec<u8> {
    format!("HTTP/1.0 200 OK\nContent-Type: {mimetype}\nContent-Length: {content_length}\n\n")
        .into_bytes()
}
