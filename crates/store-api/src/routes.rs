//! HTTP surface of the persistence API.

use crate::backend::{Backend, PageMeta};
use crate::error::ApiError;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use page_cache::{validate_partition, PageUpload};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub type SharedBackend = Arc<dyn Backend>;

/// Build the API router over `backend`.
pub fn router(backend: SharedBackend) -> Router {
    Router::new()
        .route("/api/page/data", get(get_data))
        .route("/api/page/expiration", get(get_expiration))
        .route("/api/page", axum::routing::post(put_page).delete(delete_page))
        .layer(CorsLayer::permissive())
        .with_state(backend)
}

#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    secret: Option<String>,
    hash: Option<String>,
}

impl KeyQuery {
    fn storage_key(&self) -> Result<String, ApiError> {
        let (Some(secret), Some(hash)) = (&self.secret, &self.hash) else {
            return Err(ApiError::MissingKey);
        };
        storage_key(secret, hash)
    }
}

fn storage_key(secret: &str, hash: &str) -> Result<String, ApiError> {
    validate_partition("secret", secret)?;
    validate_partition("hash", hash)?;
    Ok(format!("{secret}{hash}"))
}

async fn get_data(
    State(backend): State<SharedBackend>,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = query.storage_key()?;
    let data = backend.data(&key).await?.ok_or(ApiError::NotFound)?;
    tracing::debug!(key = %key, bytes = data.len(), "page data served");
    Ok(([(CONTENT_TYPE, "application/octet-stream")], data))
}

async fn get_expiration(
    State(backend): State<SharedBackend>,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = query.storage_key()?;
    let meta = backend.meta(&key).await?.ok_or(ApiError::NotFound)?;
    Ok(([(CONTENT_TYPE, "application/json")], meta.expiration.to_string()))
}

/// The body is parsed by hand so that every malformed upload is a 400 with
/// the same message, whatever part of it is wrong.
async fn put_page(
    State(backend): State<SharedBackend>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let upload: PageUpload =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    let key = storage_key(&upload.secret, &upload.page.hash)?;

    let meta = PageMeta {
        url: upload.page.url,
        expiration: upload.page.expiration,
    };
    let data = Bytes::from(upload.page.data.data);
    let size = data.len();
    backend.put(&key, meta, data).await?;

    tracing::info!(key = %key, bytes = size, "page stored");
    Ok(StatusCode::OK)
}

async fn delete_page(
    State(backend): State<SharedBackend>,
    Query(query): Query<KeyQuery>,
) -> Result<StatusCode, ApiError> {
    let key = query.storage_key()?;
    backend.delete(&key).await?;
    tracing::info!(key = %key, "page deleted");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use page_cache::{BufferJson, PageRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    /// Memory backend that counts every access.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Backend for CountingBackend {
        async fn data(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.data(key).await
        }

        async fn meta(&self, key: &str) -> Result<Option<PageMeta>, BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.meta(key).await
        }

        async fn put(&self, key: &str, meta: PageMeta, data: Bytes) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.put(key, meta, data).await
        }

        async fn delete(&self, key: &str) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.delete(key).await
        }
    }

    struct BrokenBackend;

    #[async_trait::async_trait]
    impl Backend for BrokenBackend {
        async fn data(&self, _key: &str) -> Result<Option<Bytes>, BackendError> {
            Err(std::io::Error::other("bucket unavailable").into())
        }

        async fn meta(&self, _key: &str) -> Result<Option<PageMeta>, BackendError> {
            Err(std::io::Error::other("bucket unavailable").into())
        }

        async fn put(&self, _key: &str, _meta: PageMeta, _data: Bytes) -> Result<(), BackendError> {
            Err(std::io::Error::other("bucket unavailable").into())
        }

        async fn delete(&self, _key: &str) -> Result<(), BackendError> {
            Err(std::io::Error::other("bucket unavailable").into())
        }
    }

    fn upload_json(secret: &str, expiration: i64, data: &[u8]) -> String {
        serde_json::to_string(&PageUpload {
            secret: secret.to_string(),
            page: PageRecord {
                hash: HASH.to_string(),
                url: "https://example.com/page".to_string(),
                expiration,
                data: BufferJson::new(data),
            },
        })
        .unwrap()
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/page")
            .header(CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn query(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        (status, resp.into_body().collect().await.unwrap().to_bytes())
    }

    #[tokio::test]
    async fn store_read_and_delete_page() {
        let app = router(Arc::new(MemoryBackend::new()));

        let (status, _) = call(&app, post(upload_json("abc", 1_700_000_000_000, b"\x1f\x8b\x08"))).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/page/data?secret=abc&hash={HASH}");
        let (status, body) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"\x1f\x8b\x08"));

        let uri = format!("/api/page/expiration?secret=abc&hash={HASH}");
        let (status, body) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"1700000000000"));

        let uri = format!("/api/page?secret=abc&hash={HASH}");
        let (status, _) = call(&app, query(Method::DELETE, &uri)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/page/data?secret=abc&hash={HASH}");
        let (status, _) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn secrets_partition_pages() {
        let app = router(Arc::new(MemoryBackend::new()));
        call(&app, post(upload_json("abc", 1, b"x"))).await;

        let uri = format!("/api/page/data?secret=other&hash={HASH}");
        let (status, _) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_hash_is_rejected_before_storage() {
        let backend = Arc::new(CountingBackend::default());
        let app = router(backend.clone());

        for (method, uri) in [
            (Method::GET, "/api/page/data?secret=abc"),
            (Method::GET, "/api/page/expiration?hash=abc"),
            (Method::DELETE, "/api/page"),
        ] {
            let (status, body) = call(&app, query(method, uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                body,
                Bytes::from_static(b"You must send \"secret\" and \"hash\" as query parameters")
            );
        }
        assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn malformed_secret_is_rejected() {
        let backend = Arc::new(CountingBackend::default());
        let app = router(backend.clone());

        let uri = format!("/api/page/data?secret=..%2Fetc&hash={HASH}");
        let (status, _) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, post(upload_json("a b", 1, b"x"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn invalid_bodies_are_rejected() {
        let backend = Arc::new(CountingBackend::default());
        let app = router(backend.clone());

        let null_expiration = upload_json("abc", 1, b"x").replace("\"expiration\":1", "\"expiration\":null");
        for body in [
            "not json".to_string(),
            r#"{"secret":"abc"}"#.to_string(),
            null_expiration,
        ] {
            let (status, _) = call(&app, post(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_500() {
        let app = router(Arc::new(BrokenBackend));

        let uri = format!("/api/page/data?secret=abc&hash={HASH}");
        let (status, _) = call(&app, query(Method::GET, &uri)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = call(&app, post(upload_json("abc", 1, b"x"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cors_is_open() {
        let app = router(Arc::new(MemoryBackend::new()));
        let req = Request::builder()
            .uri(format!("/api/page/data?secret=abc&hash={HASH}"))
            .header("origin", "https://shop.test")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }
}
