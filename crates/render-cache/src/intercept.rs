//! Which requests the render cache answers, and under which URL.

use axum::http::header::{HOST, USER_AGENT};
use axum::http::uri::Authority;
use axum::http::{HeaderMap, Method, Request};
use isbot::Bots;

/// User agent the renderer browses with. Requests carrying it come from our
/// own renderer and must reach the real page.
pub const DEFAULT_SENTINEL_USER_AGENT: &str = "render-cache-snapshotter/0.1";

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Decides whether a request is a crawler asking for an HTML page.
pub struct Interceptor {
    bots: Bots,
    sentinel_user_agent: String,
    /// Lowercased hosts we render for. Empty allows any host.
    allowed_hosts: Vec<String>,
}

impl Interceptor {
    pub fn new(sentinel_user_agent: impl Into<String>) -> Self {
        Self {
            bots: Bots::default(),
            sentinel_user_agent: sentinel_user_agent.into(),
            allowed_hosts: Vec::new(),
        }
    }

    /// Only render for these hosts. An entry without a port matches the host
    /// on any port.
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    pub fn sentinel_user_agent(&self) -> &str {
        &self.sentinel_user_agent
    }

    /// True when the request should be served from the render cache.
    ///
    /// Requires a `User-Agent` that is present, is not our own renderer's,
    /// and looks like a crawler, on a GET/HEAD whose path is either
    /// extensionless or maps to `text/html`.
    pub fn should_intercept<B>(&self, req: &Request<B>) -> bool {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return false;
        }

        let Some(user_agent) = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };

        user_agent != self.sentinel_user_agent
            && self.bots.is_bot(user_agent)
            && is_html_path(req.uri().path())
    }

    /// Whether `authority` (host with optional port) may be rendered.
    pub fn allows_host(&self, authority: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        let authority = authority.to_ascii_lowercase();
        let host = authority
            .parse::<Authority>()
            .map(|a| a.host().to_owned())
            .unwrap_or_else(|_| authority.clone());
        self.allowed_hosts
            .iter()
            .any(|allowed| *allowed == authority || *allowed == host)
    }

    /// The URL to render for `req`: its [`canonical_url`], provided the host
    /// is allowed.
    pub fn target_url<B>(&self, req: &Request<B>, default_scheme: &str) -> Option<String> {
        let host = request_host(req)?;
        if !self.allows_host(host) {
            tracing::debug!(host, "host not in allowed_hosts");
            return None;
        }
        canonical_url(req, default_scheme)
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL_USER_AGENT)
    }
}

/// Whether the MIME type guessed from `path` is absent or `text/html`.
pub fn is_html_path(path: &str) -> bool {
    match mime_guess::from_path(path).first() {
        None => true,
        Some(mime) => mime.essence_str() == "text/html",
    }
}

/// Rebuild the absolute URL the client asked for: scheme, host, then the
/// original path and query.
///
/// The scheme comes from `X-Forwarded-Proto` when a proxy set it, otherwise
/// `default_scheme`. Returns `None` when the scheme is not `http` or
/// `https`, or when no valid host is known.
pub fn canonical_url<B>(req: &Request<B>, default_scheme: &str) -> Option<String> {
    let scheme = forwarded_proto(req.headers())
        .or_else(|| req.uri().scheme_str())
        .unwrap_or(default_scheme);
    let scheme = if scheme.eq_ignore_ascii_case("https") {
        "https"
    } else if scheme.eq_ignore_ascii_case("http") {
        "http"
    } else {
        tracing::debug!(scheme, "refusing to render a non-http scheme");
        return None;
    };

    let host = request_host(req)?;

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Some(format!("{scheme}://{host}{path_and_query}"))
}

/// The `Host` header, or the URI authority when the header is absent.
/// Anything that is not a bare `host[:port]` is rejected.
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;

    // Userinfo would let the header pick a different target host.
    if host.contains('@') || host.parse::<Authority>().is_err() {
        tracing::debug!(host, "invalid host");
        return None;
    }
    Some(host)
}

fn forwarded_proto(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        // A chain of proxies appends; the first hop is the client's.
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
