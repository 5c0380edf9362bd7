//! The cache-and-render decision engine.
//!
//! For every request: decide whether to intercept, resolve a page from the
//! in-process cache, the remote store or a fresh render (first hit wins),
//! answer, then check freshness in the background.

use crate::error::{ConfigError, RenderError, StoreError};
use crate::intercept::{Interceptor, DEFAULT_SENTINEL_USER_AGENT};
use crate::negotiate::{self, ServedFrom};
use crate::render::{HeadlessRenderer, RenderOptions, Renderer};
use crate::store::{HostedStore, PageStore, RemoteData, StoreAdapter};
use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use page_cache::{now_millis, url_to_key, Expiration, Page, PageCache};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// How long a fresh render stays valid: 24 hours.
pub const DEFAULT_EXPIRATION_OFFSET: Duration = Duration::from_millis(86_400_000);

/// Tunables for [`RenderCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Validity of a freshly rendered page.
    pub expiration_offset: Duration,
    /// Scheme for canonical URLs when no proxy header says otherwise.
    pub default_scheme: String,
    /// User agent of our own renderer; requests carrying it pass through.
    pub sentinel_user_agent: String,
    /// Upper bound on background refreshes running at once.
    pub max_background_refreshes: usize,
    /// Hosts we render for. Empty renders for whatever `Host` a crawler
    /// sends.
    pub allowed_hosts: Vec<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            expiration_offset: DEFAULT_EXPIRATION_OFFSET,
            default_scheme: "http".to_string(),
            sentinel_user_agent: DEFAULT_SENTINEL_USER_AGENT.to_string(),
            max_background_refreshes: 16,
            allowed_hosts: Vec::new(),
        }
    }
}

/// Result of [`RenderCache::handle`].
pub enum Outcome {
    /// The cache answered.
    Handled(Response<Body>),
    /// Not ours, or we failed: the application must answer.
    Passthrough(Request<Body>),
}

/// Counters exposed on the admin API.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    /// Requests handed to the application.
    pub passthrough: u64,
    pub memory_hits: u64,
    pub remote_hits: u64,
    /// Requests answered by a foreground render made for them. Background
    /// and admin refreshes are not counted here.
    pub renders: u64,
    /// Failed renders of any kind: foreground, background refresh or admin
    /// refresh.
    pub render_failures: u64,
    /// Background refreshes started.
    pub refreshes: u64,
}

#[derive(Default)]
struct Counters {
    passthrough: AtomicU64,
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    refreshes: AtomicU64,
}

impl Counters {
    fn served(&self, from: ServedFrom) {
        let counter = match from {
            ServedFrom::Memory => &self.memory_hits,
            ServedFrom::Remote => &self.remote_hits,
            ServedFrom::Render => &self.renders,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("render_cache_requests_total", "outcome" => from.as_str()).increment(1);
    }

    fn passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("render_cache_requests_total", "outcome" => "passthrough").increment(1);
    }

    fn render_result(&self, ok: bool) {
        if !ok {
            self.render_failures.fetch_add(1, Ordering::Relaxed);
        }
        let result = if ok { "ok" } else { "error" };
        metrics::counter!("render_cache_renders_total", "result" => result).increment(1);
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("render_cache_refreshes_total").increment(1);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            passthrough: self.passthrough.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    pages: Arc<PageCache>,
    store: StoreAdapter,
    renderer: Arc<dyn Renderer>,
    interceptor: Interceptor,
    http: reqwest::Client,
    expiration_offset_ms: AtomicU64,
    default_scheme: String,
    refresh_permits: Arc<Semaphore>,
    counters: Counters,
}

/// Bot-aware render cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RenderCache {
    shared: Arc<Shared>,
}

impl RenderCache {
    /// Engine over a custom store and renderer with its own page cache.
    pub fn new(
        store: Arc<dyn PageStore>,
        renderer: Arc<dyn Renderer>,
        options: CacheOptions,
    ) -> Self {
        Self::with_cache(Arc::new(PageCache::new()), store, renderer, options)
    }

    /// Engine sharing an existing process-wide page cache.
    pub fn with_cache(
        pages: Arc<PageCache>,
        store: Arc<dyn PageStore>,
        renderer: Arc<dyn Renderer>,
        options: CacheOptions,
    ) -> Self {
        let permits = options.max_background_refreshes.max(1);
        Self {
            shared: Arc::new(Shared {
                pages,
                store: StoreAdapter::new(store),
                renderer,
                interceptor: Interceptor::new(options.sentinel_user_agent)
                    .with_allowed_hosts(&options.allowed_hosts),
                http: reqwest::Client::new(),
                expiration_offset_ms: AtomicU64::new(duration_ms(options.expiration_offset)),
                default_scheme: options.default_scheme,
                refresh_permits: Arc::new(Semaphore::new(permits)),
                counters: Counters::default(),
            }),
        }
    }

    /// Engine persisting to the hosted API under `secret` and rendering
    /// with headless Chromium.
    pub fn from_secret(secret: &str, options: CacheOptions) -> Result<Self, ConfigError> {
        let store = HostedStore::new(secret)?;
        let renderer = HeadlessRenderer::new(RenderOptions {
            user_agent: options.sentinel_user_agent.clone(),
            ..RenderOptions::default()
        });
        Ok(Self::new(Arc::new(store), Arc::new(renderer), options))
    }

    /// The process-wide page cache.
    pub fn pages(&self) -> &Arc<PageCache> {
        &self.shared.pages
    }

    pub fn expiration_offset(&self) -> Duration {
        Duration::from_millis(self.shared.expiration_offset_ms.load(Ordering::Relaxed))
    }

    /// Change the validity of future renders. Existing pages keep theirs.
    pub fn set_expiration_offset(&self, offset: Duration) {
        self.shared
            .expiration_offset_ms
            .store(duration_ms(offset), Ordering::Relaxed);
        tracing::info!(offset_ms = duration_ms(offset), "expiration offset updated");
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    /// Answer `req` from the cache, or hand it back untouched.
    pub async fn handle(&self, req: Request<Body>) -> Outcome {
        if !self.shared.interceptor.should_intercept(&req) {
            self.shared.counters.passthrough();
            return Outcome::Passthrough(req);
        }

        let Some(url) = self
            .shared
            .interceptor
            .target_url(&req, &self.shared.default_scheme)
        else {
            tracing::debug!(uri = %req.uri(), "no renderable URL for request");
            self.shared.counters.passthrough();
            return Outcome::Passthrough(req);
        };

        let (page, served_from) = match self.resolve(&url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "render failed, passing request through");
                self.shared.counters.passthrough();
                return Outcome::Passthrough(req);
            }
        };

        let response = match negotiate::send(req.headers(), &page, served_from) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %url, key = page.key(), error = %e, "stored page unreadable, passing request through");
                self.shared.counters.passthrough();
                return Outcome::Passthrough(req);
            }
        };

        self.shared.counters.served(served_from);
        tracing::debug!(url = %url, key = page.key(), served_from = served_from.as_str(), "served page");

        let engine = self.clone();
        tokio::spawn(async move {
            engine.revalidate(&page).await;
        });

        Outcome::Handled(response)
    }

    /// Find a page for `url`, rendering it when no tier has one. Only a
    /// render failure is an error.
    async fn resolve(&self, url: &str) -> Result<(Arc<Page>, ServedFrom), RenderError> {
        let key = url_to_key(url);

        if let Some(page) = self.shared.pages.get(&key) {
            return Ok((page, ServedFrom::Memory));
        }

        if let Some(data) = self.shared.store.get(&key).await {
            match self.fetch_remote(&data).await {
                Ok(content) => {
                    let page = Page::new(url, Expiration::Remote, content);
                    return Ok((self.shared.pages.insert(page), ServedFrom::Remote));
                }
                Err(e) => {
                    tracing::error!(url, key = %key, error = %e, "failed to load remote page content");
                }
            }
        }

        let page = self.render_page(url).await?;

        let store = self.shared.store.clone();
        let persisted = Arc::clone(&page);
        tokio::spawn(async move {
            store.set(&persisted).await;
        });

        Ok((page, ServedFrom::Render))
    }

    async fn fetch_remote(&self, data: &RemoteData) -> Result<Bytes, reqwest::Error> {
        match data {
            RemoteData::Bytes(bytes) => Ok(bytes.clone()),
            RemoteData::Url(location) => {
                self.shared
                    .http
                    .get(location)
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await
            }
        }
    }

    /// Render `url` and put the result in the in-process cache.
    async fn render_page(&self, url: &str) -> Result<Arc<Page>, RenderError> {
        let result = self.shared.renderer.render(url).await;
        self.shared.counters.render_result(result.is_ok());
        let content = result?;

        let offset_ms = self.shared.expiration_offset_ms.load(Ordering::Relaxed);
        let page = Page::new(url, Expiration::after(now_millis(), offset_ms), content);
        Ok(self.shared.pages.insert(page))
    }

    /// Re-render `url` regardless of what is cached, persist it and replace
    /// the in-process entry.
    pub async fn update(&self, url: &str) -> Result<Arc<Page>, RenderError> {
        let page = self.render_page(url).await?;
        self.shared.store.set(&page).await;
        tracing::info!(url, key = page.key(), "page refreshed");
        Ok(page)
    }

    /// Forget `url` everywhere: the remote store first, then this process.
    /// Returns the removed key.
    pub async fn remove(&self, url: &str) -> Result<String, StoreError> {
        let key = url_to_key(url);
        self.shared.store.remove(&key).await?;
        self.shared.pages.remove(&key);
        tracing::info!(url, key = %key, "page removed");
        Ok(key)
    }

    /// Whether `page` is past its deadline. Pages without a local deadline
    /// ask the remote store; no answer there means fresh.
    pub async fn is_stale(&self, page: &Page) -> bool {
        let expiration = match page.expiration {
            Expiration::At(ms) => Some(ms),
            Expiration::Remote => self.shared.store.get_expiration(page.key()).await,
        };
        expiration.is_some_and(|deadline| now_millis() >= deadline)
    }

    /// Post-response freshness check. Runs detached from the request.
    async fn revalidate(&self, page: &Page) {
        if !self.is_stale(page).await {
            return;
        }

        let Ok(_permit) = Arc::clone(&self.shared.refresh_permits).acquire_owned().await else {
            return;
        };

        self.shared.counters.refresh();
        tracing::debug!(url = page.url(), key = page.key(), "page expired, refreshing");
        if let Err(e) = self.update(page.url()).await {
            tracing::error!(url = page.url(), error = %e, "background refresh failed");
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
