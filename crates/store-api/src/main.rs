use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use store_api::{router, Backend, FsBackend, MemoryBackend};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Persistence API for rendered pages.
#[derive(Parser)]
#[command(name = "store-api")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "STORE_API_LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    listen_addr: String,

    /// Directory for page files; pages are kept in memory when omitted
    #[arg(long, env = "STORE_API_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let backend: Arc<dyn Backend> = match &args.data_dir {
        Some(dir) => {
            tracing::info!(data_dir = %dir.display(), "using filesystem backend");
            Arc::new(FsBackend::open(dir).await?)
        }
        None => {
            tracing::warn!("no data directory given, pages are kept in memory only");
            Arc::new(MemoryBackend::new())
        }
    };

    let app = router(backend).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(addr = %args.listen_addr, "store api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("store api stopped");
    Ok(())
}
