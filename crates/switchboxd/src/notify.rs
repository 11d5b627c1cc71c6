//! Listener for the device's "status changed" pings.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;
use tracing::info;

use crate::engine::Engine;

/// Any request under `/status` invalidates the cache and refreshes it.
async fn notification(State(engine): State<Engine>, uri: Uri) -> impl IntoResponse {
    if uri.path().starts_with("/status") {
        debug!("Status update notification received");
        engine.invalidate();
        engine.refresh(true);
        return (StatusCode::OK, "OK");
    }

    (StatusCode::NOT_FOUND, "Not Found")
}

/// Create the notification router. Every path and method reaches one handler.
fn create_router(engine: Engine) -> Router {
    Router::new()
        .fallback(notification)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bind the notification listener's socket
///
/// Fails when the address is invalid or the port is already taken.
pub async fn bind(listen: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Status notification server bound to {}", addr);
    Ok(listener)
}

/// Serve status notifications on a bound listener
///
/// Runs until `shutdown_rx` fires.
pub async fn serve(
    listener: TcpListener,
    engine: Engine,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, create_router(engine))
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Status notification server shutting down gracefully");
        })
        .await?;

    Ok(())
}
