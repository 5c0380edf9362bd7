use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use render_cache::{
    render_cache_layer, CacheOptions, HeadlessRenderer, MemoryStore, RenderCache, RenderOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Empty shell; everything visible is produced by `app.js`.
const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Render cache demo</title>
<script src="/app.js" defer></script>
</head>
<body><div id="root"></div></body>
</html>
"#;

const APP_JS: &str = r#"fetch('/api/products')
  .then((res) => res.json())
  .then((products) => {
    const root = document.getElementById('root');
    root.innerHTML = '<h1>Products</h1><ul>' +
      products.map((p) => '<li>' + p.name + '</li>').join('') + '</ul>';
  });
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn app_js() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/javascript")], APP_JS)
}

async fn products() -> Json<Value> {
    Json(json!([
        { "id": 1, "name": "Espresso" },
        { "id": 2, "name": "Flat white" },
        { "id": 3, "name": "Cortado" },
    ]))
}

async fn health() -> &'static str {
    "ok"
}

fn app(cache: RenderCache) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/api/products", get(products))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(cache, render_cache_layer))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = CacheOptions::default();
    let renderer = HeadlessRenderer::new(RenderOptions {
        user_agent: options.sentinel_user_agent.clone(),
        ..RenderOptions::default()
    });
    let cache = RenderCache::new(Arc::new(MemoryStore::new()), Arc::new(renderer), options);

    let app = app(cache).layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo backend starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::USER_AGENT;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use render_cache::{RenderError, Renderer, DEFAULT_SENTINEL_USER_AGENT};
    use tower::ServiceExt;

    struct Unreachable;

    #[async_trait::async_trait]
    impl Renderer for Unreachable {
        async fn render(&self, url: &str) -> Result<bytes::Bytes, RenderError> {
            Err(RenderError::Navigation(format!("{url}: no browser in tests")))
        }
    }

    fn test_app() -> Router {
        let cache = RenderCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Unreachable),
            CacheOptions::default(),
        );
        app(cache)
    }

    async fn body_of(router: Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn renderer_sees_the_script_shell() {
        let req = Request::builder()
            .uri("/")
            .header("host", "localhost:3000")
            .header(USER_AGENT, DEFAULT_SENTINEL_USER_AGENT)
            .body(Body::empty())
            .unwrap();
        let (status, body) = body_of(test_app(), req).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"<script src="/app.js""#));
    }

    #[tokio::test]
    async fn api_and_health_are_untouched() {
        let req = Request::builder()
            .uri("/api/products")
            .body(Body::empty())
            .unwrap();
        let (_, body) = body_of(test_app(), req).await;
        assert!(body.contains("Cortado"));

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(body_of(test_app(), req).await.1, "ok");
    }
}
