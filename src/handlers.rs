//! HTTP route handlers for the mirror proxy

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, Uri},
    middleware::from_fn,
    response::Response,
    routing::get,
    Json, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    cors::{cors_layer, normalize},
    emulation::available_profiles,
    error::ProxyError,
    models::{ConfigureRequest, ConfigureResponse, HealthResponse, TargetView},
    router::route,
    search::ContentIndex,
    target::{Reconfigured, TargetStore},
    validation::sanitize_url_for_logging,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub targets: Arc<TargetStore>,
    pub index: Arc<dyn ContentIndex>,
    pub semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, index: Arc<dyn ContentIndex>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let targets = Arc::new(TargetStore::new(config.proxy_prefix.clone()));
        Self {
            config,
            targets,
            index,
            semaphore,
        }
    }
}

/// Create the timeout layer (separate function to allow #[allow(deprecated)])
#[allow(deprecated)]
fn create_timeout_layer(timeout_secs: u64) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(Duration::from_secs(timeout_secs))
}

/// Build the service: operator API, health, and the proxy fallback.
pub fn app(state: AppState) -> Router {
    let max_request_body_size = state.config.max_request_body_size;
    let server_timeout = state.config.server_timeout;

    // Layers are applied bottom-up, so the last layer added is the outermost
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/target",
            get(status_handler)
                .post(configure_handler)
                .delete(disable_handler),
        )
        .fallback(proxy_handler)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_request_body_size))
        .layer(from_fn(normalize))
        .layer(TraceLayer::new_for_http())
        .layer(create_timeout_layer(server_timeout))
        .layer(cors_layer())
}

/// GET /health - Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let serving = state.targets.active().is_some();
    Json(HealthResponse::new(serving, available_profiles()))
}

/// POST /api/target - Point the proxy at a new origin
pub async fn configure_handler(
    State(state): State<AppState>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<ConfigureResponse>, ProxyError> {
    info!(
        origin = %sanitize_url_for_logging(&req.origin_base_url),
        index = ?req.index_name,
        run_id = ?req.run_id,
        "Configure requested"
    );

    // Origin validation may resolve DNS
    let targets = Arc::clone(&state.targets);
    let config = state.config.clone();
    let done = tokio::task::spawn_blocking(move || targets.configure(&req, &config))
        .await
        .map_err(|e| {
            error!(error = %e, "Configure task failed");
            ProxyError::unknown("Configure task failed")
        })?
        .inspect_err(|e| {
            warn!(
                code = %e.code(),
                error = %e.response.error,
                "Configuration rejected"
            )
        })?;

    Ok(Json(configure_response(done)))
}

/// GET /api/target - Describe the current target
pub async fn status_handler(State(state): State<AppState>) -> Json<TargetView> {
    Json(state.targets.describe())
}

/// DELETE /api/target - Stop serving the current target
pub async fn disable_handler(
    State(state): State<AppState>,
) -> Result<Json<ConfigureResponse>, ProxyError> {
    state
        .targets
        .disable()
        .map(|done| Json(configure_response(done)))
        .ok_or_else(|| ProxyError::not_found("No target is configured"))
}

/// Everything else - the mirrored site
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    route(&state, method, &uri, &headers, body).await
}

fn configure_response(done: Reconfigured) -> ConfigureResponse {
    ConfigureResponse {
        target: TargetView::from_target(&done.current),
        previous: done.previous.as_deref().map(TargetView::from_target),
    }
}
