//! Health check endpoint.

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Serve the health router until the listener fails.
///
/// Failures are logged and never propagate to the SMTP side.
pub async fn serve(listener: TcpListener) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "Health server starting"),
        Err(e) => error!(error = %e, "Health server failed"),
    }

    if let Err(e) = axum::serve(listener, router()).await {
        error!(error = %e, "Health server failed");
    }
}

/// Bind `0.0.0.0:{port}` and serve
pub async fn start(port: u16) {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => serve(listener).await,
        Err(e) => error!(port, error = %e, "Health server failed"),
    }
}
