//! Headless browser rendering of crawler snapshots.
//!
//! A [`Renderer`] turns a URL into gzip-compressed static markup. The
//! production implementation drives a single shared Chromium instance through
//! chromiumoxide; tests substitute their own.

use crate::codec;
use crate::error::RenderError;
use crate::intercept::DEFAULT_SENTINEL_USER_AGENT;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use futures_util::{Stream, StreamExt};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Lifecycle event Chromium emits once at most two requests are in flight.
const NETWORK_ALMOST_IDLE: &str = "networkAlmostIdle";

/// Renders a page to compressed, script-free markup.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<Bytes, RenderError>;
}

/// Options for [`HeadlessRenderer`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// User agent the browser presents. Must match the interceptor's sentinel.
    pub user_agent: String,

    /// Upper bound for a whole render (default: 30s).
    pub timeout: Duration,

    /// How long to wait after the load event for the network to go idle
    /// before serializing anyway (default: 5s).
    pub idle_timeout: Duration,

    /// Chrome/Chromium binary; auto-detected when `None`.
    pub chrome_executable: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_SENTINEL_USER_AGENT.to_string(),
            timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_millis(5_000),
            chrome_executable: None,
        }
    }
}

/// A launched browser and whether its CDP connection is still served.
struct LiveBrowser {
    browser: Arc<Browser>,
    alive: Arc<AtomicBool>,
}

/// Headless Chrome/Chromium renderer.
///
/// The browser is launched on the first render and shared by every render
/// after it. Launches are serialized, so at most one browser process is in
/// use per renderer. When the connection to the browser is lost the next
/// render launches a new one.
pub struct HeadlessRenderer {
    browser: Mutex<Option<LiveBrowser>>,
    options: RenderOptions,
}

impl HeadlessRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            browser: Mutex::new(None),
            options,
        }
    }

    async fn browser(&self) -> Result<Arc<Browser>, RenderError> {
        let mut slot = self.browser.lock().await;
        if let Some(live) = slot.as_ref() {
            if live.alive.load(Ordering::Acquire) {
                return Ok(Arc::clone(&live.browser));
            }
            tracing::warn!("browser connection lost, relaunching");
        }

        let live = launch(&self.options).await?;
        let browser = Arc::clone(&live.browser);
        *slot = Some(live);
        Ok(browser)
    }

    async fn navigate_and_read(
        &self,
        page: &chromiumoxide::Page,
        url: &str,
    ) -> Result<String, RenderError> {
        let navigation =
            |e: chromiumoxide::error::CdpError| RenderError::Navigation(e.to_string());

        page.set_user_agent(self.options.user_agent.clone())
            .await
            .map_err(navigation)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(navigation)?;
        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(navigation)?;

        // `goto` resolves once the load event fired.
        page.goto(url).await.map_err(navigation)?;
        let main_frame = page.mainframe().await.ok().flatten();

        let idle = tokio::time::timeout(self.options.idle_timeout, async {
            while let Some(event) = lifecycle.next().await {
                let in_main_frame = main_frame
                    .as_ref()
                    .map_or(true, |id| *id == event.frame_id);
                if in_main_frame && event.name == NETWORK_ALMOST_IDLE {
                    break;
                }
            }
        })
        .await;
        if idle.is_err() {
            tracing::debug!(url, "network still busy, serializing anyway");
        }

        page.content()
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))
    }
}

async fn launch(options: &RenderOptions) -> Result<LiveBrowser, RenderError> {
    let mut builder = BrowserConfig::builder().request_timeout(options.timeout);
    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(RenderError::BrowserLaunch)?;

    let (browser, handler) = Browser::launch(config)
        .await
        .map_err(|e| RenderError::BrowserLaunch(e.to_string()))?;

    let alive = Arc::new(AtomicBool::new(true));
    tokio::spawn(drive_handler(handler, Arc::clone(&alive)));

    tracing::info!("headless browser launched");
    Ok(LiveBrowser {
        browser: Arc::new(browser),
        alive,
    })
}

/// Poll CDP handler events until the connection closes, then clear `alive`.
/// An error event concerns one message, not the session.
async fn drive_handler<S, E>(mut events: S, alive: Arc<AtomicBool>)
where
    S: Stream<Item = Result<(), E>> + Unpin,
    E: Display,
{
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            tracing::debug!(error = %e, "browser handler event error");
        }
    }
    alive.store(false, Ordering::Release);
    tracing::warn!("browser handler stopped");
}

#[async_trait::async_trait]
impl Renderer for HeadlessRenderer {
    async fn render(&self, url: &str) -> Result<Bytes, RenderError> {
        let start = Instant::now();
        let browser = self.browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let timeout_ms = self.options.timeout.as_millis() as u64;
        let outcome =
            tokio::time::timeout(self.options.timeout, self.navigate_and_read(&page, url)).await;

        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "failed to close page");
        }

        let html = outcome.map_err(|_| RenderError::Timeout(timeout_ms))??;
        let content = snapshot(&html)?;

        tracing::debug!(
            url,
            render_ms = start.elapsed().as_millis() as u64,
            bytes = content.len(),
            "page rendered"
        );
        Ok(content)
    }
}

/// Turn serialized DOM into stored page content: drop executable elements,
/// make sure a doctype leads, gzip.
pub fn snapshot(html: &str) -> Result<Bytes, RenderError> {
    let stripped = strip_executable(html)?;
    let markup = if has_doctype(&stripped) {
        stripped
    } else {
        format!("<!DOCTYPE html>{stripped}")
    };
    codec::gzip(markup.as_bytes()).map_err(|e| RenderError::PostProcess(e.to_string()))
}

/// Remove every `<script>` and `<iframe>` element, contents included.
pub fn strip_executable(html: &str) -> Result<String, RenderError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script, iframe", |el| {
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| RenderError::PostProcess(e.to_string()))
}

fn has_doctype(html: &str) -> bool {
    html.trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doctype"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_iframes() {
        let html = r#"<html><head><script src="/app.js"></script></head><body><h1>Hi</h1><script>document.write("x")</script><iframe src="https://ads.test"></iframe><p>text</p></body></html>"#;
        let out = strip_executable(html).unwrap();

        assert!(!out.contains("<script"));
        assert!(!out.contains("<iframe"));
        assert!(!out.contains("document.write"));
        assert!(out.contains("<h1>Hi</h1>"));
        assert!(out.contains("<p>text</p>"));
    }

    #[test]
    fn keeps_other_markup_untouched() {
        let html = r#"<html><body><noscript>fallback</noscript><div id="root"><a href="/x">x</a></div></body></html>"#;
        assert_eq!(strip_executable(html).unwrap(), html);
    }

    #[test]
    fn snapshot_adds_doctype_and_compresses() {
        let packed = snapshot("<html><body><script>1</script>ok</body></html>").unwrap();
        let markup = codec::gunzip(&packed).unwrap();
        assert_eq!(
            markup,
            Bytes::from_static(b"<!DOCTYPE html><html><body>ok</body></html>")
        );
    }

    #[test]
    fn snapshot_keeps_existing_doctype() {
        let packed = snapshot("<!doctype html><html></html>").unwrap();
        let markup = codec::gunzip(&packed).unwrap();
        assert_eq!(markup, Bytes::from_static(b"<!doctype html><html></html>"));
    }

    #[tokio::test]
    async fn handler_keeps_polling_after_event_errors() {
        let alive = Arc::new(AtomicBool::new(true));
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let events = futures_util::stream::iter(vec![
            Err("unknown CDP event"),
            Ok(()),
            Err("malformed message"),
            Ok(()),
        ])
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        drive_handler(events, Arc::clone(&alive)).await;

        assert_eq!(seen.load(Ordering::Relaxed), 4);
        assert!(!alive.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn closed_connection_marks_browser_dead() {
        let alive = Arc::new(AtomicBool::new(true));
        drive_handler(futures_util::stream::empty::<Result<(), String>>(), Arc::clone(&alive)).await;
        assert!(!alive.load(Ordering::Acquire));
    }

    #[test]
    fn default_options_use_sentinel_agent() {
        let opts = RenderOptions::default();
        assert_eq!(opts.user_agent, DEFAULT_SENTINEL_USER_AGENT);
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert_eq!(opts.idle_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    #[ignore = "requires network and Chrome/Chromium"]
    async fn renders_real_page() {
        let renderer = HeadlessRenderer::new(RenderOptions::default());
        let packed = renderer.render("https://example.com/").await.unwrap();
        let markup = codec::gunzip(&packed).unwrap();
        let markup = String::from_utf8_lossy(&markup);

        assert!(markup.starts_with("<!DOCTYPE html>") || markup.starts_with("<!doctype html>"));
        assert!(markup.contains("Example Domain"));
        assert!(!markup.contains("<script"));
    }
}
