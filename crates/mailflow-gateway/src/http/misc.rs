use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use mailflow_core::types::{CustomModel, UserSettings};
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::{authed, ApiError};
use crate::http::emails::user_handle;
use crate::http::ok;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "users": state.users.list_usernames().len(),
    }))
}

// ── settings ─────────────────────────────────────────────────────────────

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, record) = authed(&state, &headers)?;
    Ok(ok(serde_json::json!({
        "settings": record.settings,
        "custom_models": record.custom_models,
        "email": record.email,
    })))
}

#[derive(Deserialize)]
pub struct SaveSettingsBody {
    pub settings: UserSettings,
    #[serde(default)]
    pub custom_models: Option<Vec<CustomModel>>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_auth_code: Option<String>,
}

pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SaveSettingsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, record) = authed(&state, &headers)?;
    let normalized = state.users.update_settings(&username, body.settings)?;
    if let Some(models) = body.custom_models {
        state.users.set_custom_models(&username, models)?;
    }
    if let (Some(email), Some(code)) = (body.email.as_deref(), body.email_auth_code.as_deref()) {
        state.users.set_mailbox(&username, email, code)?;
    }
    // Model or template changes require fresh collaborators.
    state.invalidate_ports(record.user_id.as_str());
    Ok(ok(serde_json::json!({"settings": normalized})))
}

// ── stats / activities / history ─────────────────────────────────────────

pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let data = handle.data.lock().await;
    let derived = mailflow_engine::stats::compute(&data);
    let categories = mailflow_engine::stats::category_stats_today(&data);
    Ok(ok(serde_json::json!({
        "stats": derived,
        "categories": categories,
    })))
}

#[derive(Deserialize)]
pub struct TrendQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

pub async fn trend(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TrendQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let data = handle.data.lock().await;
    let points = mailflow_engine::stats::trend(&data, query.days.clamp(1, 90));
    Ok(ok(serde_json::json!({"trend": points})))
}

pub async fn activities(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let data = handle.data.lock().await;
    let list: Vec<_> = data.activities.iter().collect();
    Ok(ok(serde_json::json!({"activities": list})))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let data = handle.data.lock().await;
    Ok(ok(serde_json::json!({"history": data.history})))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.clear_history(&handle).await?;
    Ok(ok(serde_json::json!({})))
}

// ── diagnostics ──────────────────────────────────────────────────────────

pub async fn test_mailbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let ports = state.ports_for(&username)?;
    ports
        .mailbox
        .check_connection()
        .await
        .map_err(|e| mailflow_core::MailflowError::Mailbox(e.to_string()))?;
    Ok(ok(serde_json::json!({"mailbox": "ok"})))
}

pub async fn test_ai(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let ports = state.ports_for(&username)?;
    let summary = ports
        .llm
        .summarise("连接测试：请返回一句确认。")
        .await
        .map_err(|e| mailflow_core::MailflowError::Llm(e.to_string()))?;
    Ok(ok(serde_json::json!({"ai": "ok", "reply": summary})))
}

#[derive(Deserialize)]
pub struct SummariseBody {
    pub text: String,
}

pub async fn summarise_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SummariseBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let ports = state.ports_for(&username)?;
    let summary = ports
        .llm
        .summarise(&body.text)
        .await
        .map_err(|e| mailflow_core::MailflowError::Llm(e.to_string()))?;
    Ok(ok(serde_json::json!({"summary": summary})))
}
