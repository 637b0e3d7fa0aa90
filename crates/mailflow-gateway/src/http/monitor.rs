use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::auth::{authed, ApiError};
use crate::http::emails::user_handle;
use crate::http::ok;

pub async fn start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    let ports = state.ports_for(&username)?;
    let started = state.engine.start_monitor(handle, ports);
    if started {
        info!(user = %username, "monitor started via API");
    }
    Ok(ok(serde_json::json!({"running": true, "newly_started": started})))
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    let handle = user_handle(&state, &username).await?;
    state.engine.stop_monitor(&handle).await;
    Ok(ok(serde_json::json!({"running": false})))
}

#[derive(Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
}

/// Toggle auto-process; the monitor picks the change up on its next tick.
pub async fn toggle_auto_process(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ToggleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, record) = authed(&state, &headers)?;
    let mut settings = record.settings.clone();
    settings.auto_process = body.enabled;
    state.users.update_settings(&username, settings)?;
    Ok(ok(serde_json::json!({"auto_process": body.enabled})))
}
