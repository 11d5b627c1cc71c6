use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::engine::RELAY_COUNT;
use crate::error::Error;

const MANUFACTURER: &str = "Blebox";
const MODEL: &str = "SwitchboxD 2.0";

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    manufacturer: String,
    model: String,
    name: String,
    device: String,
    mode: String,
}

/// One relay as seen by the host
#[derive(Debug, Serialize)]
struct RelayView {
    id: usize,
    name: String,
    /// `None` until the device state is known
    on: Option<bool>,
}

/// Body of PUT /v1/relays/{id}
#[derive(Deserialize)]
struct SetRelayRequest {
    on: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Engine errors mapped onto HTTP status codes
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::Range(_) => StatusCode::NOT_FOUND,
            Error::Transport(_) | Error::Decode(_) => StatusCode::BAD_GATEWAY,
            Error::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// Shared application state
struct AppState {
    version: &'static str,
    engine: Engine,
    name: String,
    names: Vec<String>,
}

impl AppState {
    fn relay_name(&self, id: usize) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("Switch {}", id))
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            name: state.name.clone(),
            device: state.engine.device().ip().to_string(),
            mode: state.engine.mode().to_string(),
        }),
    )
}

/// Handler for GET /v1/relays
///
/// Reports the last known state only; never triggers a fetch.
#[tracing::instrument(skip(state))]
async fn list_relays(State(state): State<Arc<AppState>>) -> Json<Vec<RelayView>> {
    let record = state.engine.cached();
    let relays = (0..RELAY_COUNT)
        .map(|id| RelayView {
            id,
            name: state.relay_name(id),
            on: record.as_ref().and_then(|r| r.relay(id).ok()).map(|r| r.on),
        })
        .collect();

    Json(relays)
}

/// Handler for GET /v1/relays/{id}
#[tracing::instrument(skip(state))]
async fn get_relay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
) -> Result<Json<RelayView>, ApiError> {
    let on = state.engine.read(id).await?;
    Ok(Json(RelayView {
        id,
        name: state.relay_name(id),
        on: Some(on),
    }))
}

/// Handler for PUT /v1/relays/{id}
#[tracing::instrument(skip(state, request))]
async fn set_relay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
    Json(request): Json<SetRelayRequest>,
) -> Result<Json<RelayView>, ApiError> {
    state.engine.write(id, request.on).await?;
    Ok(Json(RelayView {
        id,
        name: state.relay_name(id),
        on: Some(request.on),
    }))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/relays", get(list_relays))
        .route("/v1/relays/:id", get(get_relay).put(set_relay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the HTTP API socket
///
/// Fails when the address is invalid or the port is already taken, before
/// anything is served.
pub async fn bind(listen: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("HTTP API server bound to {}", addr);
    Ok(listener)
}

/// Serve the HTTP API on a bound listener
///
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listener` - Socket returned by [`bind`]
/// * `engine` - Status engine backing the relay endpoints
/// * `name` - Display name of the device
/// * `names` - Display names of the relays, by relay id
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    listener: TcpListener,
    engine: Engine,
    name: String,
    names: Vec<String>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        engine,
        name,
        names,
    });
    let app = create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
