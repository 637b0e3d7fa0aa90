use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::{authed, ApiError};
use crate::http::ok;
use mailflow_engine::state::UserHandle;

/// Handle + legacy aliases for a request's user.
pub(crate) async fn user_handle(state: &AppState, username: &str) -> Result<Arc<UserHandle>, ApiError> {
    let record = state
        .users
        .get(username)
        .ok_or_else(|| mailflow_core::MailflowError::UserNotFound(username.to_string()))?;
    let aliases = state.users.aliases_of(username);
    let alias_refs: Vec<&str> = aliases.iter().map(String::as_str).collect();
    Ok(state.engine.registry.handle(&record.user_id, &alias_refs))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let data = handle.data.lock().await;
    Ok(ok(serde_json::json!({
        "emails": data.cache,
        "last_check_time": data.last_check_time,
    })))
}

/// Manual refresh: one ingestion cycle without auto-processing.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    let settings = ports.settings.settings();
    let new = state
        .engine
        .run_monitor_cycle(&handle, &ports, &settings, false)
        .await;
    Ok(ok(serde_json::json!({"new_emails": new})))
}

#[derive(Deserialize, Default)]
pub struct ProcessBody {
    #[serde(default)]
    pub auto_send: bool,
}

/// Kick off the pipeline for one message; results arrive as events.
pub async fn process_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<ProcessBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    let auto_send = body.map(|b| b.auto_send).unwrap_or(false);

    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine
            .process_one(&handle, &ports, &id, auto_send, None)
            .await;
    });
    Ok(ok(serde_json::json!({"started": true})))
}

/// Kick off a full sweep; progress and the final summary arrive as events.
pub async fn process_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ProcessBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    let auto_send = body.map(|b| b.auto_send).unwrap_or(false);

    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.process_all(&handle, &ports, auto_send).await;
    });
    Ok(ok(serde_json::json!({"started": true})))
}

pub async fn stop_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.stop_one(&handle, &id).await;
    Ok(ok(serde_json::json!({"stopping": id})))
}

pub async fn stop_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.stop_all(&handle).await;
    Ok(ok(serde_json::json!({"stopping": "all"})))
}

#[derive(Deserialize, Default)]
pub struct SendBody {
    #[serde(default)]
    pub reply: Option<String>,
}

pub async fn send_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<SendBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    let reply = body.and_then(|b| b.0.reply);
    state
        .engine
        .send_reply_manual(&handle, &ports, &id, reply)
        .await?;
    Ok(ok(serde_json::json!({"sent": id})))
}

#[derive(Deserialize)]
pub struct UpdateReplyBody {
    pub reply: String,
}

pub async fn update_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateReplyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.update_reply(&handle, &id, body.reply).await?;
    Ok(ok(serde_json::json!({"updated": id})))
}

pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.delete_message(&handle, &id).await?;
    Ok(ok(serde_json::json!({"deleted": id})))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    state.engine.mark_read_manual(&handle, &ports, &id).await?;
    Ok(ok(serde_json::json!({"read": id})))
}

#[derive(Deserialize)]
pub struct RetryRagBody {
    pub queries: Vec<String>,
}

/// Re-run the pipeline with client-edited retrieval queries.
pub async fn retry_rag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RetryRagBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;

    // The message goes back to pending so the pipeline can claim it again.
    {
        let mut data = handle.data.lock().await;
        if let Some(m) = data.find_mut(&id) {
            m.status = mailflow_core::types::EmailStatus::Pending;
        }
    }

    let engine = state.engine.clone();
    let queries = body.queries;
    tokio::spawn(async move {
        engine
            .process_one(&handle, &ports, &id, false, Some(queries))
            .await;
    });
    Ok(ok(serde_json::json!({"started": true})))
}
