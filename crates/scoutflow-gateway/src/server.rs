//! HTTP server: invoke, resume and inspect sessions

use crate::auth::{authorize, Caller};
use crate::error::ApiError;
use axum::{
    extract::{Path as AxumPath, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use scoutflow_core::config::GatewayConfig;
use scoutflow_core::{InvokeRequest, ResumeRequest, Result, SessionId, SessionState};
use scoutflow_engine::Orchestrator;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Rejects malformed criteria before a session is created for them.
pub type CriteriaCheck = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub criteria_check: Option<CriteriaCheck>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            criteria_check: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_criteria_check(mut self, check: CriteriaCheck) -> Self {
        self.criteria_check = Some(check);
        self
    }

    /// Caller allowed on `id`, checked against the stored owner when the
    /// session exists.
    async fn authorize_existing(&self, headers: &HeaderMap, id: &SessionId) -> Result<Caller> {
        authorize(headers, id, None)?;
        let record = self.orchestrator.record(id).await?;
        authorize(headers, id, record.owner.as_deref())
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions/:session_id", get(state_handler))
        .route("/sessions/:session_id/invoke", post(invoke_handler))
        .route("/sessions/:session_id/resume", post(resume_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(Arc::new(state))
}

pub async fn start_gateway(state: GatewayState, config: &GatewayConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", config.bind, config.port, e))?;

    info!("Scoutflow Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Stages:       {}", stage_names(&state.orchestrator).join(" -> "));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn stage_names(orchestrator: &Orchestrator) -> Vec<String> {
    orchestrator
        .pipeline()
        .stages()
        .iter()
        .map(|s| s.name.clone())
        .collect()
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.orchestrator.sessions().list().len(),
        "stages": stage_names(&state.orchestrator),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn invoke_handler(
    AxumPath(session_id): AxumPath<String>,
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<InvokeRequest>,
) -> std::result::Result<Json<SessionState>, ApiError> {
    let id = SessionId::parse(session_id)?;
    let caller = authorize(&headers, &id, None)?;
    if let Some(check) = &state.criteria_check {
        check(&req.criteria)?;
    }
    info!(session = %id, user = %caller.user_id, "invoke");
    let snapshot = state
        .orchestrator
        .invoke(&id, Some(caller.user_id.as_str()), req.criteria)
        .await?;
    Ok(Json(snapshot))
}

async fn resume_handler(
    AxumPath(session_id): AxumPath<String>,
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<ResumeRequest>,
) -> std::result::Result<Json<SessionState>, ApiError> {
    let id = SessionId::parse(session_id)?;
    let caller = state.authorize_existing(&headers, &id).await?;
    info!(
        session = %id,
        user = %caller.user_id,
        checkpoint = %req.checkpoint_id,
        decision = %req.decision.kind(),
        "resume"
    );
    let snapshot = state
        .orchestrator
        .resume(&id, &req.checkpoint_id, req.decision)
        .await?;
    Ok(Json(snapshot))
}

async fn state_handler(
    AxumPath(session_id): AxumPath<String>,
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<SessionState>, ApiError> {
    let id = SessionId::parse(session_id)?;
    state.authorize_existing(&headers, &id).await?;
    Ok(Json(state.orchestrator.get_state(&id).await?))
}
