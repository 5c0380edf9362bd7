use axum::middleware::from_fn_with_state;
use axum::routing::any;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use render_cache::admin::{self, AdminState};
use render_cache::config::{self, Config};
use render_cache::proxy::{proxy_handler, UpstreamState};
use render_cache::{render_cache_layer, HeadlessRenderer, RenderCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config_path: PathBuf = std::env::var_os("RENDER_CACHE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load_or_default(&config_path);

    if config.cache.allowed_hosts.is_empty() {
        tracing::warn!("cache.allowed_hosts is empty, rendering for any Host a crawler sends");
    }

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let cache = RenderCache::new(
        config.build_store()?,
        Arc::new(HeadlessRenderer::new(config.render_options())),
        config.cache_options(),
    );

    let upstream = Arc::new(UpstreamState {
        client: Client::builder(TokioExecutor::new()).build_http(),
        upstream_url: config.upstream.url.clone(),
        timeout: Duration::from_millis(config.upstream.timeout_ms),
    });

    // Crawlers are answered by the middleware, everyone else is forwarded.
    let app = Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .layer(from_fn_with_state(cache.clone(), render_cache_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(upstream);

    let admin_app = admin::router(AdminState {
        cache: cache.clone(),
        prometheus: Some(prometheus),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(&config.server.admin_addr).await?;

    tracing::info!(
        listen = %config.server.listen_addr,
        admin = %config.server.admin_addr,
        upstream = %config.upstream.url,
        store = if config.store.secret.is_some() { "hosted" } else { "memory" },
        expiration_offset_ms = config.cache.expiration_offset_ms,
        "render cache starting"
    );

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = if config_path.exists() {
        config::watch(&config_path, config, cache)
            .inspect_err(|e| tracing::warn!(error = %e, "config hot reload disabled"))
            .ok()
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let (served, admin_served) = tokio::join!(
        axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned()),
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned()),
    );
    if let Err(e) = admin_served {
        tracing::error!(error = %e, "admin listener failed");
    }
    served?;

    tracing::info!("render cache stopped");
    Ok(())
}

/// Cancel `token` on SIGINT, or SIGTERM where available.
async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "cannot listen for ctrl-c");
                return;
            }
        }
        _ = terminate() => {}
    }
    tracing::info!("shutting down, draining open connections");
    token.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
