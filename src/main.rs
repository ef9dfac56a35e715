use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use abacatepay_status_checker::config::{CheckerConfig, ServerConfig};
use abacatepay_status_checker::{build_router, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env if available
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // A bad configuration still serves: every check answers 500 with the reason.
    let checker_config = CheckerConfig::from_env();
    match &checker_config {
        Ok(config) => tracing::info!(api_url = %config.abacatepay.api_url, supabase_url = %config.supabase.url, "Configuration loaded"),
        Err(e) => tracing::error!(error = %e, "Configuration incomplete"),
    }

    let state = Arc::new(AppState::from_config(checker_config));
    let app = build_router(state);

    let server_config = ServerConfig::from_env();
    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));

    tracing::info!(%addr, "Server listening");
    tracing::info!("   - Status Check:  http://{}/", addr);
    tracing::info!("   - Health Check:  http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("SIGTERM received, shutting down gracefully");
}
