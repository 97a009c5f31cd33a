//! HTTP upload boundary.
//!
//! | route                  | purpose                                   |
//! |------------------------|-------------------------------------------|
//! | `POST /plan`           | set the expected clip total (`num=<N>`)   |
//! | `POST /`, `/upload`    | multipart `index` + `file`                |
//! | `GET /`, `/status`     | readiness; streams the video when ready   |
//! | `GET /done`            | deliver, clean up, shut down              |
//! | `GET /health`          | liveness                                  |
//! | `GET /api/progress`    | JSON progress snapshot                    |

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::Config;
use crate::coordinator::Coordinator;

pub mod error;
mod routes;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub coordinator: Coordinator,
    pub config: Arc<Config>,
    /// Cancelled by `GET /done` to stop the server.
    pub shutdown: CancellationToken,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let body_limit = ctx.config.server.max_upload_mb as usize * 1024 * 1024;

    Router::new()
        .route("/", get(routes::status).post(routes::upload))
        .route("/status", get(routes::status))
        .route("/upload", post(routes::upload))
        .route("/plan", post(routes::plan))
        .route("/done", get(routes::done))
        .route("/health", get(routes::health))
        .route("/api/progress", get(routes::progress))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit)),
        )
        .with_state(ctx)
}

/// Start the HTTP server and run until a signal or `GET /done`.
pub async fn start_server(config: Config, coordinator: Coordinator) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    coordinator
        .prepare()
        .await
        .context("Failed to prepare working directory")?;

    let shutdown = CancellationToken::new();
    let ctx = AppContext {
        coordinator,
        config: Arc::new(config),
        shutdown: shutdown.clone(),
    };
    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting server on {}", addr);
    if let Some(ip) = lan_address() {
        tracing::info!("Reachable on the local network at http://{}:{}", ip, addr.port());
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Address of the interface that routes to the outside world. No packet is
/// sent; connecting a UDP socket only selects a route.
fn lan_address() -> Option<std::net::IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

async fn shutdown_signal(done: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = done.cancelled() => {},
    }

    tracing::info!("Shutdown signal received");
}
