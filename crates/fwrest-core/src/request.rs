//! Per-request metadata handed to the core by the transport layer

use std::fmt;

/// HTTP methods the device surface answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Method, normalized path and declared body length of one inbound call.
///
/// The body itself is not part of the head: handlers receive the
/// pre-buffered slice and the transport separately and combine them into a
/// [`StreamCursor`](crate::StreamCursor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Path with the leading `/` stripped, e.g. `api/lfs/www/index.html`
    pub path: String,
    /// Declared content length, `-1` when unknown
    pub content_length: i64,
}

impl RequestHead {
    pub fn new(method: Method, path: &str, content_length: Option<u64>) -> Self {
        Self {
            method,
            path: normalize_path(path),
            content_length: content_length
                .and_then(|len| i64::try_from(len).ok())
                .unwrap_or(-1),
        }
    }
}

/// Strip the leading `/` the way the device web server presents URLs to
/// its handlers.
pub fn normalize_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_normalizes_path_and_length() {
        let head = RequestHead::new(Method::Post, "/api/lfs/a.txt", Some(12));
        assert_eq!(head.path, "api/lfs/a.txt");
        assert_eq!(head.content_length, 12);

        let head = RequestHead::new(Method::Get, "api/info", None);
        assert_eq!(head.content_length, -1);
    }
}
