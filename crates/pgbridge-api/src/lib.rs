pub mod app;
pub mod health;
pub mod metrics;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use tracing::{error, info};

use crate::app::build_app;
use crate::state::AppState;

pub use health::{CheckResult, HealthMonitor, POSTGRES_CHECK};

/// Serves the health and metrics routes until `shutdown` resolves.
pub async fn serve_with_state(
    addr: SocketAddr,
    state: AppState,
    health_path: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_app(state, health_path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, health_path, "Health server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to install SIGTERM handler");
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
