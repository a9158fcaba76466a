use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use glint_shared::types::{
    ConversationKey, Message, NotificationPreference, PushSubscription, UserId,
};
use glint_store::ConversationLog;

use crate::config::ServerConfig;
use crate::directory::Directory;
use crate::error::ServerError;
use crate::hub::ConnectionHub;
use crate::notify::PushFanout;
use crate::router::MessageRouter;
use crate::signaling::SignalingRelay;
use crate::streaks::{RestoreInfo, StreakEngine, StreakState};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ConnectionHub>,
    pub log: Arc<dyn ConversationLog>,
    pub directory: Arc<dyn Directory>,
    pub streaks: Arc<StreakEngine>,
    pub fanout: Arc<PushFanout>,
    pub router: Arc<MessageRouter>,
    pub signaling: Arc<SignalingRelay>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .route("/messages/:other_id", get(conversation_history))
        .route("/streaks/:other_id/status", get(streak_status))
        .route("/streaks/:other_id/restore", post(streak_restore))
        .route("/streaks/:other_id/restore-premium", post(streak_restore_premium))
        .route("/push/subscribe", post(push_subscribe))
        .route("/push/unsubscribe", post(push_unsubscribe))
        .route("/push/preferences", post(push_preferences))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the caller from a bearer credential via the directory.
async fn authenticate(
    headers: &HeaderMap,
    directory: &Arc<dyn Directory>,
) -> Result<UserId, ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    directory
        .verify_credential(token)
        .await
        .ok_or_else(|| ServerError::Unauthorized("Invalid or expired credential".into()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connected_users: usize,
    deferred_notifications: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreakStatusResponse {
    streak: StreakState,
    is_active: bool,
    time_left_ms: Option<i64>,
    flame_health: u32,
    restore_info: RestoreInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreResponse {
    success: bool,
    streak: StreakState,
    restore_info: RestoreInfo,
}

#[derive(Deserialize)]
struct SubscribeRequest {
    subscription: PushSubscription,
}

#[derive(Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connected_users: state.hub.connected_count().await,
        deferred_notifications: state.fanout.deferred_count().await,
    })
}

/// Conversation history with the addressed user, minus anything the caller
/// soft-deleted from their own view.
async fn conversation_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    let other = UserId::new(other_id);
    let key = ConversationKey::direct(&caller, &other);

    let messages = state
        .log
        .messages(&key)
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .into_iter()
        .filter(|m| !m.is_deleted_for(&caller))
        .collect();

    Ok(Json(messages))
}

async fn streak_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<StreakStatusResponse>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    let other = UserId::new(other_id);

    let time_left = state.streaks.time_until_expiry(&caller, &other).await;
    Ok(Json(StreakStatusResponse {
        streak: state.streaks.snapshot(&caller, &other).await,
        is_active: state.streaks.is_active(&caller, &other).await,
        time_left_ms: time_left.map(|d| d.num_milliseconds()),
        flame_health: state.streaks.flame_health(&caller, &other).await,
        restore_info: state.streaks.restore_info(&caller, &other).await,
    }))
}

async fn streak_restore(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<RestoreResponse>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    let other = UserId::new(other_id);

    if !state.streaks.can_restore(&caller, &other).await {
        return Err(ServerError::PaymentRequired("No free restores left".into()));
    }

    let streak = state.streaks.use_restore(&caller, &other, false).await;
    info!(user = %caller, other = %other, "Free streak restore used");
    Ok(Json(RestoreResponse {
        success: true,
        streak,
        restore_info: state.streaks.restore_info(&caller, &other).await,
    }))
}

async fn streak_restore_premium(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<RestoreResponse>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    let other = UserId::new(other_id);

    // Payment is settled by the external billing collaborator before this
    // endpoint is called.
    let streak = state.streaks.use_restore(&caller, &other, true).await;
    info!(user = %caller, other = %other, "Premium streak restore activated");
    Ok(Json(RestoreResponse {
        success: true,
        streak,
        restore_info: state.streaks.restore_info(&caller, &other).await,
    }))
}

async fn push_subscribe(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    if req.subscription.endpoint.is_empty() {
        return Err(ServerError::BadRequest("subscription endpoint required".into()));
    }
    state.fanout.subscribe(caller, req.subscription).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn push_unsubscribe(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    state.fanout.unsubscribe(&caller, &req.endpoint).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn push_preferences(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(prefs): Json<NotificationPreference>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = authenticate(&headers, &state.directory).await?;
    state.fanout.set_preferences(caller, prefs).await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP/WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
