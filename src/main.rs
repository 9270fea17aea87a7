use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use doc_search::library::DocumentLibrary;
use doc_search::rag::lifecycle::IndexController;
use doc_search::rag::RagComponents;
use doc_search::server::{router, AppState};
use doc_search::Settings;

#[derive(Parser, Debug)]
#[command(name = "doc-search")]
#[command(about = "Document search and summarization server")]
struct Args {
    /// Configuration file (defaults to ./doc-search.toml when present)
    #[arg(short, long, env = "DOC_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Overrides server.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("doc_search=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    let settings = Arc::new(settings);

    let library = Arc::new(DocumentLibrary::new(
        settings.storage.upload_dir.clone(),
        settings.storage.allowed_extensions.clone(),
    ));
    library.ensure_dir()?;

    tracing::info!(
        embedding = ?settings.embedding.provider,
        store = ?settings.vector_store.backend,
        summarizer = ?settings.summarizer.provider,
        "Initializing search components"
    );
    let components = RagComponents::from_settings(&settings)?;
    let controller = Arc::new(IndexController::new(
        library,
        components,
        settings.index.rebuild_timeout(),
    ));

    if settings.index.warm_on_start {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(e) = controller.ensure_ready().await {
                tracing::warn!("Index warm-up failed, will retry on first search: {}", e);
            }
        });
    }

    let state = AppState::new(Arc::clone(&controller), Arc::clone(&settings));
    let app = router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        upload_folder = %settings.storage.upload_dir.display(),
        "Server listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
