use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod backend;
mod config;
mod error;
mod gate;
mod ingest;
mod knowledge;
mod logging;
mod models;
mod projections;
mod retry;
mod routes;

#[cfg(test)]
mod tests;

use backend::BackendClient;
use config::Config;
use error::DashboardError;
use gate::SessionGate;
use retry::{ActionQueue, InFlight};

/// Backend-for-frontend of the chatbot admin dashboard.
/// Holds no records of its own; every view is derived from a fresh fetch.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: BackendClient,
    pub gate: SessionGate,
    pub actions: ActionQueue,
    pub in_flight: InFlight,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, DashboardError> {
        let backend = BackendClient::new(&config.api_url, config.request_timeout())?;
        let gate = SessionGate::new(&config.admin_password, config.session_ttl_hours);

        Ok(Self {
            config: Arc::new(config),
            backend,
            gate,
            actions: ActionQueue::new(),
            in_flight: InFlight::new(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), DashboardError> {
    let config = Config::load()?;
    logging::init_logging(config.json_logs());

    let addr = config.socket_addr()?;
    let state = AppState::new(config)?;
    tracing::info!(backend = state.backend.base_url(), "Backend configured");

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Dashboard API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/analytics", get(routes::dashboard))
        .route("/analytics/interactions", get(routes::interactions))
        .route("/analytics/categories", get(routes::categories))
        .route("/analytics/reply-speed", get(routes::reply_speed))
        .route(
            "/knowledge",
            get(routes::list_knowledge).post(routes::add_knowledge),
        )
        .route("/knowledge/:id", put(routes::edit_knowledge))
        .route("/training", get(routes::list_unanswered))
        .route("/training/:id/answer", post(routes::answer_unanswered))
        .route("/actions", get(routes::list_actions))
        .route("/actions/:id", delete(routes::dismiss_action))
        .route("/actions/:id/retry", post(routes::retry_action))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_admin,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/login", post(routes::login))
        .route("/logout", post(routes::logout))
        .route("/sessions/duration", post(routes::record_session_duration))
        .route("/chat", post(routes::chat))
        .route("/feedback", post(routes::feedback))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Any origin when none are configured; otherwise only the listed ones,
/// with credentials so the session cookie is sent.
fn cors_layer(config: &Config) -> CorsLayer {
    if config.allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn root() -> &'static str {
    "Campus Chatbot Dashboard API v0.1.0"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "pending_actions": state.actions.len(),
    }))
}
