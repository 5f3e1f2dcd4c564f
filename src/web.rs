use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tower_http::cors::CorsLayer;

use crate::recommend::RecommendationResponse;
use crate::service::{ServiceContext, ServiceError};

#[derive(Clone)]
struct SharedState {
    service: Arc<ServiceContext>,
}

pub fn router(service: Arc<ServiceContext>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/recommend", post(recommend))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => log::error!("failed to install signal handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

/// Bind immediately, build the pipeline in the background and serve until
/// a shutdown signal arrives.
pub async fn serve(service: Arc<ServiceContext>) -> anyhow::Result<()> {
    let addr = service.config().listen_addr.clone();

    let init_service = service.clone();
    tokio::task::spawn_blocking(move || match init_service.init_from_config() {
        Ok(()) => log::info!(
            "service ready with {} documents",
            init_service.document_count()
        ),
        Err(_) => log::error!("service will answer requests with an initialization error"),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(service: Arc<ServiceContext>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(service))
}

/// Shown instead of the recorded reason, which stays in the logs.
const INIT_FAILED_MESSAGE: &str = "service failed to initialize";

#[derive(Debug)]
enum HttpError {
    Service(ServiceError),
    /// Body missing, not JSON, or not shaped like `{"text": ...}`.
    BadBody(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, message) = match self {
            HttpError::BadBody(reason) => (StatusCode::BAD_REQUEST, reason),
            HttpError::Service(err) => match err {
                ServiceError::InvalidQuery => (StatusCode::BAD_REQUEST, err.to_string()),
                ServiceError::IndexNotReady => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
                ServiceError::InitFailed(_) => {
                    log::error!("{err:?}");
                    (StatusCode::INTERNAL_SERVER_ERROR, INIT_FAILED_MESSAGE.to_string())
                }
                ServiceError::RetrievalFailure | ServiceError::AlreadyInitialized => {
                    log::error!("{err:?}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ServiceError::RetrievalFailure.to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadBody(rejection.body_text())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendRequest {
    pub text: String,
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<RecommendRequest>, JsonRejection>,
) -> Result<Json<RecommendationResponse>, HttpError> {
    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}");

    let response = state.service.recommend(&payload.text).await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ready: bool,
    pub documents: usize,
    /// Set once initialization has failed; the service will not become ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ready: state.service.is_ready(),
        documents: state.service.document_count(),
        error: state
            .service
            .init_error()
            .map(|_| INIT_FAILED_MESSAGE.to_string()),
    })
}
