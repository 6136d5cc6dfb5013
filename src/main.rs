use std::sync::Arc;

use fetchly_backend::{
    api,
    config::ServiceConfig,
    error::{ApiError, ApiResult},
    service::MediaService,
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "fetchly_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> ApiResult<()> {
    let config = ServiceConfig::from_env();
    let addr = config.bind_addr.clone();

    let service = Arc::new(MediaService::new(config).await?);
    info!("Downloads directory: {:?}", service.custodian().root());

    let removed = service.custodian().sweep_expired().await;
    if removed > 0 {
        info!("Startup sweep removed {removed} file(s)");
    }

    let app = api::router(Arc::clone(&service))?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind {addr}: {error}")))?;
    info!("Backend ready on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    info!(
        "Shutting down, cancelling {} pending delete(s)",
        service.custodian().pending_deletes()
    );
    service.shutdown().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!("Failed to install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
