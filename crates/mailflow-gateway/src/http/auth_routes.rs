use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::auth::{authed, authed_admin, ApiError};
use crate::http::ok;

#[derive(Deserialize)]
pub struct RegisterBody {
    pub username: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.users.register(&body.username, &body.password)?;
    Ok(ok(serde_json::json!({
        "username": body.username,
        "user_id": record.user_id,
    })))
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let device = body.device_name.as_deref().unwrap_or("web");
    let (token, record) = state.users.login(&body.username, &body.password, device)?;
    info!(username = %body.username, "login");
    Ok(ok(serde_json::json!({
        "token": token,
        "username": body.username,
        "user_id": record.user_id,
        "settings": record.settings,
    })))
}

#[derive(Deserialize)]
pub struct ChangePasswordBody {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, _) = authed(&state, &headers)?;
    state
        .users
        .change_password(&username, &body.old_password, &body.new_password)?;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
pub struct ResetPasswordBody {
    pub username: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ResetPasswordBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed_admin(&state, &headers)?;
    state.users.reset_password(&body.username, &body.new_password)?;
    Ok(ok(serde_json::json!({})))
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub new_username: String,
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RenameBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, record) = authed(&state, &headers)?;
    state.users.rename(&username, &body.new_username)?;
    // Collaborators cache settings under the (stable) user id; a rename
    // does not move any data, only the login handle.
    state.invalidate_ports(record.user_id.as_str());
    info!(old = %username, new = %body.new_username, "user renamed");
    Ok(ok(serde_json::json!({"username": body.new_username})))
}
