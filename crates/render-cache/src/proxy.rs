//! Pass-through forwarding to the upstream application.
//!
//! The `render-cache` binary sits in front of one upstream. Crawler requests
//! are answered by the render cache middleware; whatever it passes through
//! lands here and is forwarded unchanged.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use hyper_util::client::legacy::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Body>;

/// State for the forwarding handler.
pub struct UpstreamState {
    pub client: HttpClient,
    pub upstream_url: String,
    pub timeout: Duration,
}

/// Forward a request to the upstream and stream its response back.
pub async fn proxy_handler(
    State(state): State<Arc<UpstreamState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let upstream_uri = format!(
        "{}{}",
        state.upstream_url.trim_end_matches('/'),
        parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    );

    let mut builder = Request::builder().method(&parts.method).uri(&upstream_uri);
    for (key, value) in parts.headers.iter() {
        // The client connector sets Host from the upstream URI
        if key == HOST {
            continue;
        }
        builder = builder.header(key, value);
    }

    let upstream_req = match builder.body(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream request");
            return bad_gateway();
        }
    };

    let upstream_resp =
        match tokio::time::timeout(state.timeout, state.client.request(upstream_req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::error!(error = %e, upstream = %upstream_uri, "upstream request failed");
                return bad_gateway();
            }
            Err(_) => {
                tracing::error!(upstream = %upstream_uri, "upstream request timed out");
                return StatusCode::GATEWAY_TIMEOUT.into_response();
            }
        };

    let (mut parts, body) = upstream_resp.into_parts();
    // Skip hop-by-hop headers
    parts.headers.remove(TRANSFER_ENCODING);
    parts.headers.remove(CONNECTION);

    tracing::debug!(
        status = parts.status.as_u16(),
        upstream = %upstream_uri,
        latency_us = start.elapsed().as_micros() as u64,
        "forwarded to upstream"
    );

    Response::from_parts(parts, Body::new(body))
}

fn bad_gateway() -> Response<Body> {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{any, get};
    use axum::Router;
    use http_body_util::BodyExt;
    use hyper_util::rt::TokioExecutor;
    use tower::ServiceExt;

    async fn spawn_upstream() -> String {
        let app = Router::new().route(
            "/echo",
            get(|req: Request<Body>| async move {
                let ua = req
                    .headers()
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                format!("{}|{}", req.uri(), ua)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn router(upstream_url: String) -> Router {
        let state = Arc::new(UpstreamState {
            client: Client::builder(TokioExecutor::new()).build_http(),
            upstream_url,
            timeout: Duration::from_secs(5),
        });
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
    }

    #[tokio::test]
    async fn forwards_path_query_and_headers() {
        let app = router(spawn_upstream().await);
        let req = Request::builder()
            .uri("/echo?x=1")
            .header("user-agent", "tester")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"/echo?x=1|tester");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        // Port 9 (discard) is closed on test machines.
        let app = router("http://127.0.0.1:9".to_string());
        let req = Request::builder().uri("/echo").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
