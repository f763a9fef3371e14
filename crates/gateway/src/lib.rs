//! Administrative HTTP surface.
//!
//! A thin pass-through over the running system: health, avatar listings,
//! manual schedule triggers, bus counters, runtime log level, and the
//! inbox/outbox of avatars that declare an `inbox` connector. None of these
//! handlers run a pipeline themselves.
//!
//! Built on Axum.

use axum::extract::{DefaultBodyLimit, Path, Query};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use aicrew_channels::{InboxMessage, InboxRegistry, SentReply};
use aicrew_config::GatewayConfig;
use aicrew_core::avatar::{ActiveWindow, AvatarId, AvatarProfile, ScheduleSpec};
use aicrew_core::event::{BusStats, EventBus};
use aicrew_providers::ModelGateway;
use aicrew_workflow::{ScheduleSnapshot, SchedulerHandle, TriggerOutcome, TriggerTarget};

/// Levels accepted by `PUT /log_level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Changes the process log filter at runtime.
pub trait LogLevelControl: Send + Sync {
    /// `level` is already validated and lowercase.
    fn set_level(&self, level: &str) -> Result<(), String>;
}

/// Everything the admin handlers read.
pub struct AdminState {
    pub profiles: Vec<AvatarProfile>,
    pub scheduler: SchedulerHandle,
    pub bus: EventBus,
    pub inboxes: InboxRegistry,
    pub models: Option<Arc<ModelGateway>>,
    pub log_level: Option<Arc<dyn LogLevelControl>>,
    pub started_at: DateTime<Utc>,
}

impl AdminState {
    pub fn new(mut profiles: Vec<AvatarProfile>, scheduler: SchedulerHandle, bus: EventBus, inboxes: InboxRegistry) -> Self {
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            profiles,
            scheduler,
            bus,
            inboxes,
            models: None,
            log_level: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_models(mut self, models: Arc<ModelGateway>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_log_level(mut self, control: Arc<dyn LogLevelControl>) -> Self {
        self.log_level = Some(control);
        self
    }

    fn profile(&self, id: &str) -> Option<&AvatarProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }
}

type SharedState = Arc<AdminState>;

/// Build the Axum router with all admin routes.
pub fn build_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/avatars", get(list_avatars_handler))
        .route("/avatars/{id}", get(get_avatar_handler))
        .route("/avatars/{id}/inbox", post(push_inbox_handler))
        .route("/avatars/{id}/outbox", get(drain_outbox_handler))
        .route("/log_level", put(log_level_handler))
        .route("/trigger_schedule", post(trigger_schedule_handler))
        .route("/bus/stats", get(bus_stats_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin surface until `shutdown` resolves.
pub async fn serve(
    config: &GatewayConfig,
    state: Arc<AdminState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);

    info!(addr = %addr, "Admin gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}

// --- Responses ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn unknown_avatar(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("Avatar '{id}' not found"))
}

fn scheduler_down() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "Scheduler is not running")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendHealth {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub avatars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<Vec<BackendHealth>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarSummary {
    pub id: AvatarId,
    pub name: String,
    pub backend: String,
    pub model: String,
    pub tools: Vec<String>,
    pub rag: bool,
    pub schedule: ScheduleSpec,
    pub topics: Vec<String>,
    pub has_inbox: bool,
}

#[derive(Debug, Serialize)]
pub struct AvatarDetail {
    #[serde(flatten)]
    pub summary: AvatarSummary,
    pub personality: String,
    pub skills: Vec<String>,
    pub history_limit: usize,
    pub active_windows: Vec<ActiveWindow>,
    pub escalate_to: Option<AvatarId>,
    pub schedule_state: Option<ScheduleSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub results: Vec<TriggerOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxAccepted {
    pub id: String,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub replies: Vec<SentReply>,
}

fn summarize(state: &AdminState, profile: &AvatarProfile) -> AvatarSummary {
    AvatarSummary {
        id: profile.id.clone(),
        name: profile.name.clone(),
        backend: profile.backend.clone(),
        model: profile.model.clone(),
        tools: profile.tools.clone(),
        rag: profile.rag,
        schedule: profile.schedule.clone(),
        topics: profile.topics.clone(),
        has_inbox: state.inboxes.get(&profile.id).is_some(),
    }
}

// --- Handlers ---

#[derive(Debug, Default, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    deep: bool,
}

/// `?deep=true` also probes every model backend.
async fn health_handler(State(state): State<SharedState>, Query(query): Query<HealthQuery>) -> Json<HealthResponse> {
    let backends = match (&state.models, query.deep) {
        (Some(models), true) => Some(
            models
                .health_report()
                .await
                .into_iter()
                .map(|(name, healthy)| BackendHealth { name, healthy })
                .collect::<Vec<_>>(),
        ),
        _ => None,
    };
    let degraded = backends.as_ref().is_some_and(|b| b.iter().any(|h| !h.healthy));

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        avatars: state.profiles.len(),
        backends,
    })
}

async fn list_avatars_handler(State(state): State<SharedState>) -> Json<Vec<AvatarSummary>> {
    Json(state.profiles.iter().map(|p| summarize(&state, p)).collect())
}

async fn get_avatar_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<AvatarDetail>, ApiError> {
    let profile = state.profile(&id).ok_or_else(|| unknown_avatar(&id))?;

    // A stopped scheduler still lets the profile be shown.
    let schedule_state = state
        .scheduler
        .snapshot()
        .await
        .ok()
        .and_then(|entries| entries.into_iter().find(|e| e.avatar == id));

    Ok(Json(AvatarDetail {
        summary: summarize(&state, profile),
        personality: profile.personality.clone(),
        skills: profile.skills.clone(),
        history_limit: profile.history_limit,
        active_windows: profile.active_windows.clone(),
        escalate_to: profile.escalate_to.clone(),
        schedule_state,
    }))
}

#[derive(Debug, Deserialize)]
struct LogLevelQuery {
    level: Option<String>,
}

async fn log_level_handler(
    State(state): State<SharedState>,
    Query(query): Query<LogLevelQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let requested = query
        .level
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing 'level' query parameter"))?;
    let level = requested.trim().to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid log level '{requested}'. Use one of: {}", LOG_LEVELS.join(", ")),
        ));
    }

    let control = state
        .log_level
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "Log level control not available"))?;
    control
        .set_level(&level)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    info!(level = %level, "Log level changed");
    Ok(Json(serde_json::json!({ "level": level })))
}

#[derive(Debug, Deserialize)]
struct TriggerQuery {
    avatar: Option<String>,
}

/// Run one avatar (`?avatar=id`) or all of them now.
async fn trigger_schedule_handler(
    State(state): State<SharedState>,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let target = match query.avatar {
        Some(id) if !id.trim().is_empty() => TriggerTarget::Avatar(id.trim().to_string()),
        _ => TriggerTarget::All,
    };
    let results = state.scheduler.trigger(target).await.map_err(|_| scheduler_down())?;
    Ok(Json(TriggerResponse { results }))
}

async fn bus_stats_handler(State(state): State<SharedState>) -> Json<BusStats> {
    Json(state.bus.stats())
}

async fn push_inbox_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(message): Json<InboxMessage>,
) -> Result<(StatusCode, Json<InboxAccepted>), ApiError> {
    let inbox = state.inboxes.get(&id).ok_or_else(|| {
        if state.profile(&id).is_some() {
            api_error(StatusCode::NOT_FOUND, format!("Avatar '{id}' has no inbox connector"))
        } else {
            unknown_avatar(&id)
        }
    })?;
    if message.body.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message body is empty"));
    }

    let item_id = inbox.push(message);
    Ok((
        StatusCode::ACCEPTED,
        Json(InboxAccepted {
            id: item_id,
            pending: inbox.pending_len(),
        }),
    ))
}

async fn drain_outbox_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<OutboxResponse>, ApiError> {
    let inbox = state.inboxes.get(&id).ok_or_else(|| unknown_avatar(&id))?;
    Ok(Json(OutboxResponse {
        replies: inbox.drain_outbox(),
    }))
}
