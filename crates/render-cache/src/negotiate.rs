//! Content negotiation for cached pages.

use crate::codec;
use crate::error::CodecError;
use axum::body::Body;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use page_cache::Page;

/// Response header naming the tier that produced the page.
pub const X_RENDER_CACHE: &str = "x-render-cache";

/// Where a served page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Memory,
    Remote,
    Render,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Memory => "memory",
            ServedFrom::Remote => "remote",
            ServedFrom::Render => "render",
        }
    }
}

/// Whether the client's `Accept-Encoding` admits gzip.
///
/// `gzip` or `x-gzip` decide when listed; otherwise a `*` does. A quality of
/// zero is a refusal.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    let mut explicit = None;
    let mut wildcard = None;

    let codings = headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','));

    for entry in codings {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        let accepted = parts.all(|param| !is_zero_quality(param));

        if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
            explicit = Some(explicit.unwrap_or(false) || accepted);
        } else if coding == "*" {
            wildcard = Some(accepted);
        }
    }

    explicit.or(wildcard).unwrap_or(false)
}

fn is_zero_quality(param: &str) -> bool {
    let Some((name, value)) = param.split_once('=') else {
        return false;
    };
    name.trim().eq_ignore_ascii_case("q")
        && value.trim().parse::<f32>().is_ok_and(|q| q <= 0.0)
}

/// Build the HTML response for `page`.
///
/// Gzip-capable clients get the stored bytes as they are. Everyone else gets
/// them decompressed here.
pub fn send(
    request_headers: &HeaderMap,
    page: &Page,
    served_from: ServedFrom,
) -> Result<Response<Body>, CodecError> {
    let gzip = accepts_gzip(request_headers);
    let body = if gzip {
        page.content.clone()
    } else {
        codec::gunzip(&page.content)?
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    headers.insert(X_RENDER_CACHE, HeaderValue::from_static(served_from.as_str()));
    if gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }

    Ok(response)
}
