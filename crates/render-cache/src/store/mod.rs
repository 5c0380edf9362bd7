//! Remote persistence of rendered pages.
//!
//! [`PageStore`] is the four-operation surface the engine needs from a
//! backend. [`StoreAdapter`] wraps any implementation so that backend
//! failures are logged and read as misses instead of failing requests.

mod hosted;
mod memory;

pub use hosted::{HostedStore, DEFAULT_ENDPOINT};
pub use memory::MemoryStore;

use crate::error::StoreError;
use bytes::Bytes;
use page_cache::Page;
use std::sync::Arc;

/// What a store holds for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteData {
    /// The compressed page itself.
    Bytes(Bytes),
    /// Location to download the compressed page from.
    Url(String),
}

impl RemoteData {
    /// Interpret a raw response body. A body that is nothing but an
    /// `http(s)://` URL points at the content; anything else is the content.
    /// Gzip data starts with `0x1f 0x8b` so it can never be mistaken for one.
    pub fn from_body(body: Bytes) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        if let Ok(text) = std::str::from_utf8(&body) {
            let text = text.trim();
            if (text.starts_with("https://") || text.starts_with("http://"))
                && !text.contains(char::is_whitespace)
            {
                return Some(RemoteData::Url(text.to_string()));
            }
        }
        Some(RemoteData::Bytes(body))
    }
}

/// Backend capability set. Any of these may fail at any time.
#[async_trait::async_trait]
pub trait PageStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteData>, StoreError>;

    /// Authoritative expiration, milliseconds since the Unix epoch.
    async fn get_expiration(&self, key: &str) -> Result<Option<i64>, StoreError>;

    async fn set(&self, page: &Page) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Failure-tolerant front for a [`PageStore`].
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<dyn PageStore>,
}

impl StoreAdapter {
    pub fn new(inner: Arc<dyn PageStore>) -> Self {
        Self { inner }
    }

    /// Lookup; errors are logged and read as absent.
    pub async fn get(&self, key: &str) -> Option<RemoteData> {
        match self.inner.get(key).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(key, error = %e, "remote store get failed");
                None
            }
        }
    }

    /// Expiration lookup; errors are logged and read as absent.
    pub async fn get_expiration(&self, key: &str) -> Option<i64> {
        match self.inner.get_expiration(key).await {
            Ok(expiration) => expiration,
            Err(e) => {
                tracing::error!(key, error = %e, "remote store get_expiration failed");
                None
            }
        }
    }

    /// Persist a page. Returns whether the write was acknowledged.
    pub async fn set(&self, page: &Page) -> bool {
        match self.inner.set(page).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = page.key(), url = page.url(), error = %e, "remote store set failed");
                false
            }
        }
    }

    /// Delete a key. Unlike the other operations this reports failure, since
    /// the caller asked for the removal explicitly.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await.inspect_err(|e| {
            tracing::error!(key, error = %e, "remote store remove failed");
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Store whose every operation fails.
    pub(crate) struct FailingStore;

    #[async_trait::async_trait]
    impl PageStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<RemoteData>, StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn get_expiration(&self, _key: &str) -> Result<Option<i64>, StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn set(&self, _page: &Page) -> Result<(), StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("unreachable".into()))
        }
    }

    #[test]
    fn body_with_url_is_a_pointer() {
        let data = RemoteData::from_body(Bytes::from_static(b"https://cdn.test/p.gz\n"));
        assert_eq!(data, Some(RemoteData::Url("https://cdn.test/p.gz".into())));
    }

    #[test]
    fn gzip_body_is_content() {
        let body = Bytes::from_static(&[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(
            RemoteData::from_body(body.clone()),
            Some(RemoteData::Bytes(body))
        );
    }

    #[test]
    fn empty_body_is_absent() {
        assert_eq!(RemoteData::from_body(Bytes::new()), None);
    }

    #[test]
    fn text_with_spaces_is_content() {
        let body = Bytes::from_static(b"http://a.test/ and more");
        assert!(matches!(RemoteData::from_body(body), Some(RemoteData::Bytes(_))));
    }

    #[tokio::test]
    async fn adapter_swallows_read_failures() {
        let store = StoreAdapter::new(Arc::new(FailingStore));
        let page = Page::new("https://a.test/", page_cache::Expiration::At(1), Bytes::new());

        assert_eq!(store.get("k").await, None);
        assert_eq!(store.get_expiration("k").await, None);
        assert!(!store.set(&page).await);
        assert!(store.remove("k").await.is_err());
    }

    #[tokio::test]
    async fn adapter_passes_through_success() {
        let memory = Arc::new(MemoryStore::new());
        let store = StoreAdapter::new(memory.clone());
        let page = Page::new(
            "https://a.test/",
            page_cache::Expiration::At(77),
            Bytes::from_static(b"gz"),
        );

        assert!(store.set(&page).await);
        assert_eq!(
            store.get(page.key()).await,
            Some(RemoteData::Bytes(Bytes::from_static(b"gz")))
        );
        assert_eq!(store.get_expiration(page.key()).await, Some(77));
        assert!(store.remove(page.key()).await.is_ok());
        assert_eq!(store.get(page.key()).await, None);
    }
}
