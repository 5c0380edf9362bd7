use crate::engine::{CacheOptions, RenderCache};
use crate::error::ConfigError;
use crate::intercept::DEFAULT_SENTINEL_USER_AGENT;
use crate::render::RenderOptions;
use crate::store::{HostedStore, MemoryStore, PageStore, DEFAULT_ENDPOINT};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_expiration_offset_ms")]
    pub expiration_offset_ms: u64,
    #[serde(default = "default_scheme")]
    pub default_scheme: String,
    #[serde(default = "default_max_background_refreshes")]
    pub max_background_refreshes: usize,
    #[serde(default = "default_sentinel_user_agent")]
    pub sentinel_user_agent: String,
    /// Hosts crawlers may ask us to render. Empty trusts the `Host` header.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Deployment secret for the hosted API. Without one pages are only
    /// kept in memory.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_store_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_render_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, running on defaults");
            return Self::default_config();
        }
        Self::load(path)
            .inspect(|_| tracing::info!(path = %path.display(), "config loaded"))
            .unwrap_or_else(|e| {
                tracing::error!(path = %path.display(), error = %e, "unusable config file, running on defaults");
                Self::default_config()
            })
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            render: RenderConfig::default(),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            expiration_offset: Duration::from_millis(self.cache.expiration_offset_ms),
            default_scheme: self.cache.default_scheme.clone(),
            sentinel_user_agent: self.cache.sentinel_user_agent.clone(),
            max_background_refreshes: self.cache.max_background_refreshes,
            allowed_hosts: self.cache.allowed_hosts.clone(),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            user_agent: self.cache.sentinel_user_agent.clone(),
            timeout: Duration::from_millis(self.render.timeout_ms),
            idle_timeout: Duration::from_millis(self.render.idle_timeout_ms),
            chrome_executable: self.render.chrome_executable.clone(),
        }
    }

    /// Hosted store when a secret is configured, in-memory otherwise.
    pub fn build_store(&self) -> Result<Arc<dyn PageStore>, ConfigError> {
        match &self.store.secret {
            Some(secret) => Ok(Arc::new(HostedStore::with_endpoint(
                secret.as_str(),
                &self.store.endpoint,
                Duration::from_millis(self.store.timeout_ms),
            )?)),
            None => {
                tracing::warn!("no store secret configured, pages are kept in memory only");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_offset_ms: default_expiration_offset_ms(),
            default_scheme: default_scheme(),
            max_background_refreshes: default_max_background_refreshes(),
            sentinel_user_agent: default_sentinel_user_agent(),
            allowed_hosts: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            secret: None,
            endpoint: default_store_endpoint(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_render_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            chrome_executable: None,
        }
    }
}

/// Compare old and new config and apply what can change at runtime.
///
/// - Expiration offset changed → applied to future renders
/// - Anything else changed → WARN log, ignored until restart
pub fn diff_and_apply(old: &Config, new: &Config, cache: &RenderCache) {
    if old.cache.expiration_offset_ms != new.cache.expiration_offset_ms {
        cache.set_expiration_offset(Duration::from_millis(new.cache.expiration_offset_ms));
        tracing::info!(
            old = old.cache.expiration_offset_ms,
            new = new.cache.expiration_offset_ms,
            "config reloaded: expiration offset changed"
        );
    }

    let mut old_rest = old.cache.clone();
    old_rest.expiration_offset_ms = new.cache.expiration_offset_ms;
    if old_rest != new.cache
        || old.store != new.store
        || old.render != new.render
        || old.upstream.url != new.upstream.url
        || old.server.listen_addr != new.server.listen_addr
        || old.server.admin_addr != new.server.admin_addr
    {
        tracing::warn!("config change detected that needs a restart to take effect, ignoring");
    }
}

/// Re-read `path` on every change and hand each new version to
/// [`diff_and_apply`]. The watch stops when the returned watcher is dropped.
pub fn watch(
    path: &Path,
    initial: Config,
    cache: RenderCache,
) -> Result<RecommendedWatcher, notify::Error> {
    let applied = Mutex::new(initial);
    let reload_path = path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "config watch error");
                return;
            }
        };
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }
        match Config::load(&reload_path) {
            Ok(next) => {
                let mut current = applied.lock();
                diff_and_apply(&current, &next, &cache);
                *current = next;
            }
            Err(e) => tracing::error!(error = %e, "config reload failed, keeping previous"),
        }
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    tracing::info!(path = %path.display(), "watching config for changes");
    Ok(watcher)
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_upstream_timeout_ms() -> u64 {
    5000
}
fn default_expiration_offset_ms() -> u64 {
    86_400_000
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_max_background_refreshes() -> usize {
    16
}
fn default_sentinel_user_agent() -> String {
    DEFAULT_SENTINEL_USER_AGENT.to_string()
}
fn default_store_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_store_timeout_ms() -> u64 {
    10_000
}
fn default_render_timeout_ms() -> u64 {
    30_000
}
fn default_idle_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEFAULT_EXPIRATION_OFFSET;
    use crate::render::Renderer;
    use crate::RenderError;
    use bytes::Bytes;

    struct NeverRenders;

    #[async_trait::async_trait]
    impl Renderer for NeverRenders {
        async fn render(&self, _url: &str) -> Result<Bytes, RenderError> {
            Err(RenderError::Navigation("unused".into()))
        }
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.admin_addr, "0.0.0.0:9090");
        assert_eq!(config.upstream.url, "http://127.0.0.1:3000");
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.store.secret, None);
        assert_eq!(config.store.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(
            config.cache_options().expiration_offset,
            DEFAULT_EXPIRATION_OFFSET
        );
    }

    #[test]
    fn parses_sections() {
        let config = Config::parse(
            r#"
            [upstream]
            url = "http://app:4000"

            [cache]
            expiration_offset_ms = 60000
            default_scheme = "https"
            allowed_hosts = ["example.com", "www.example.com"]

            [store]
            secret = "abc"

            [render]
            timeout_ms = 10000
            chrome_executable = "/usr/bin/chromium"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.url, "http://app:4000");
        assert_eq!(config.cache.expiration_offset_ms, 60_000);
        assert_eq!(config.cache_options().default_scheme, "https");
        assert_eq!(
            config.cache_options().allowed_hosts,
            ["example.com", "www.example.com"]
        );
        assert_eq!(config.store.secret.as_deref(), Some("abc"));
        let render = config.render_options();
        assert_eq!(render.timeout, Duration::from_secs(10));
        assert_eq!(render.user_agent, DEFAULT_SENTINEL_USER_AGENT);
        assert_eq!(
            render.chrome_executable.as_deref(),
            Some(Path::new("/usr/bin/chromium"))
        );
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            Config::parse("[cache\nexpiration_offset_ms = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn bad_secret_fails_store_construction() {
        let mut config = Config::default_config();
        config.store.secret = Some("not/valid".into());
        assert!(matches!(config.build_store(), Err(ConfigError::Secret(_))));
    }

    #[test]
    fn reload_applies_expiration_offset() {
        let old = Config::default_config();
        let mut new = old.clone();
        new.cache.expiration_offset_ms = 1_000;

        let cache = RenderCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NeverRenders),
            old.cache_options(),
        );
        diff_and_apply(&old, &new, &cache);

        assert_eq!(cache.expiration_offset(), Duration::from_secs(1));
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_or_default(&path).cache, CacheConfig::default());

        std::fs::write(&path, "[cache\n").unwrap();
        assert_eq!(Config::load_or_default(&path).cache, CacheConfig::default());

        std::fs::write(&path, "[cache]\nexpiration_offset_ms = 5\n").unwrap();
        assert_eq!(Config::load_or_default(&path).cache.expiration_offset_ms, 5);
    }
}
