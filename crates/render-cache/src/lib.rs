//! Bot-aware server-side-rendering cache.
//!
//! Crawlers asking for HTML pages get a pre-rendered, script-free snapshot;
//! everyone else reaches the application untouched. Snapshots are resolved
//! from the in-process [`PageCache`](page_cache::PageCache), then the remote
//! [`PageStore`](store::PageStore), then a fresh headless render.

pub mod admin;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod intercept;
pub mod middleware;
pub mod negotiate;
pub mod proxy;
pub mod render;
pub mod store;

pub use engine::{CacheOptions, EngineStats, Outcome, RenderCache, DEFAULT_EXPIRATION_OFFSET};
pub use error::{CodecError, ConfigError, Error, RenderError, StoreError};
pub use intercept::{Interceptor, DEFAULT_SENTINEL_USER_AGENT};
pub use middleware::render_cache_layer;
pub use page_cache::{url_to_key, Expiration, Page, PageCache};
pub use render::{HeadlessRenderer, RenderOptions, Renderer};
pub use store::{HostedStore, MemoryStore, PageStore, RemoteData, StoreAdapter};
