use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod host;
mod http;

/// Distributed message search plugin: incremental indexing plus federated search.
#[derive(Parser, Debug)]
#[command(name = "search-gateway")]
struct Cli {
    /// Path to search.toml. Defaults to ~/.search-plugin/search.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = search_core::config::SearchConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        search_core::config::SearchConfig::default()
    });

    let rpc_host = host::RpcHost::new(config.host.clone(), config.storage.clone());
    let shared_host: Arc<dyn search_core::host::HostCapabilities> = Arc::new(rpc_host);

    let mut engine = search_engine::Engine::new(shared_host.clone());
    engine.start().await.map_err(|e| anyhow::anyhow!(e))?;

    let coordinator = search_federation::Coordinator::new(shared_host, config.host.plugin_no.clone());

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        engine: tokio::sync::RwLock::new(engine),
        coordinator,
    });
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("search gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    state.engine.write().await.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining bucket workers");
}
