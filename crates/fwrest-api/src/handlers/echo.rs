//! Echo page for unrecognised API paths

use axum::response::{Html, IntoResponse, Response};
use fwrest_core::Method;

use super::SMALL_BODY_LIMIT;
use crate::transport::DeviceRequest;

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body>{}</body></html>",
        title, content
    )
}

/// Describe the request back to the client.
///
/// POST bodies are echoed from the bytes that arrived with the head only,
/// HTML-escaped.
pub async fn echo(mut request: DeviceRequest) -> Response {
    let path = escape_html(&request.head.path);
    match request.head.method {
        Method::Get => {
            tracing::debug!(path = %request.head.path, "GET echo");
            Html(page("GET REST API", &format!("GET of {}", path))).into_response()
        }
        Method::Post => {
            tracing::debug!(path = %request.head.path, "POST echo");
            let first = request.body.prebuffer().await.unwrap_or_default();
            let shown = &first[..first.len().min(SMALL_BODY_LIMIT)];
            let content = format!(
                "POST to {}<br/>Content Length:{}<br/>Content:[{}]<br/>",
                path,
                request.head.content_length,
                escape_html(&String::from_utf8_lossy(shown)),
            );
            Html(page("POST REST API", &content)).into_response()
        }
    }
}
