use super::{PageStore, RemoteData};
use crate::error::StoreError;
use page_cache::Page;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct StoredPage {
    data: RemoteData,
    expiration: Option<i64>,
}

/// Process-local [`PageStore`].
///
/// Used when no hosted secret is configured, and as the store in tests.
/// Operation counters let callers observe how the engine used it.
#[derive(Default)]
pub struct MemoryStore {
    pages: RwLock<HashMap<String, StoredPage>>,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key whose content lives at `url`.
    pub fn put_url(&self, key: &str, url: impl Into<String>, expiration: Option<i64>) {
        self.pages.write().insert(
            key.to_string(),
            StoredPage {
                data: RemoteData::Url(url.into()),
                expiration,
            },
        );
    }

    /// Overwrite the authoritative expiration of an existing key.
    pub fn set_expiration(&self, key: &str, expiration: Option<i64>) -> bool {
        match self.pages.write().get_mut(key) {
            Some(stored) => {
                stored.expiration = expiration;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pages.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    /// Number of `get` calls served.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `set` calls served.
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl PageStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteData>, StoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.pages.read().get(key).map(|p| p.data.clone()))
    }

    async fn get_expiration(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.pages.read().get(key).and_then(|p| p.expiration))
    }

    async fn set(&self, page: &Page) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        let expiration = page
            .expiration
            .as_millis()
            .ok_or_else(|| StoreError::MissingExpiration(page.key().to_string()))?;
        self.pages.write().insert(
            page.key().to_string(),
            StoredPage {
                data: RemoteData::Bytes(page.content.clone()),
                expiration: Some(expiration),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.pages.write().remove(key);
        Ok(())
    }
}
