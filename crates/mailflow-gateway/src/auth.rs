//! Bearer device-token authentication and the JSON error shape.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mailflow_core::MailflowError;
use mailflow_users::types::UserRecord;

use crate::app::AppState;

/// API-level error: a [`MailflowError`] rendered as a JSON body with its
/// stable code string.
pub struct ApiError(pub MailflowError);

impl From<MailflowError> for ApiError {
    fn from(e: MailflowError) -> Self {
        Self(e)
    }
}

impl From<mailflow_users::UserError> for ApiError {
    fn from(e: mailflow_users::UserError) -> Self {
        let mapped = match &e {
            mailflow_users::UserError::NotFound(name) => MailflowError::UserNotFound(name.clone()),
            mailflow_users::UserError::AuthFailed(_) | mailflow_users::UserError::UsernameTaken(_) => {
                MailflowError::AuthFailed(e.to_string())
            }
            _ => MailflowError::Persistence(e.to_string()),
        };
        Self(mapped)
    }
}

impl From<mailflow_engine::EngineError> for ApiError {
    fn from(e: mailflow_engine::EngineError) -> Self {
        let mapped = match &e {
            mailflow_engine::EngineError::RateLimited(msg) => MailflowError::RateLimited(msg.clone()),
            mailflow_engine::EngineError::Mailbox(_) => MailflowError::Mailbox(e.to_string()),
            mailflow_engine::EngineError::Llm(_) => MailflowError::Llm(e.to_string()),
            mailflow_engine::EngineError::Knowledge(_) => MailflowError::Knowledge(e.to_string()),
            _ => MailflowError::Internal(e.to_string()),
        };
        Self(mapped)
    }
}

impl From<mailflow_kb::KbError> for ApiError {
    fn from(e: mailflow_kb::KbError) -> Self {
        Self(MailflowError::Knowledge(e.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MailflowError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            MailflowError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            MailflowError::UserNotFound(_) => StatusCode::NOT_FOUND,
            MailflowError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            MailflowError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "success": false,
            "code": self.0.code(),
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Resolve the Authorization header to the owning user.
pub fn authed(state: &AppState, headers: &HeaderMap) -> Result<(String, UserRecord), ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(MailflowError::AuthFailed("缺少访问令牌".to_string())))?;
    state
        .users
        .authenticate(token)
        .ok_or_else(|| ApiError(MailflowError::AuthFailed("无效的访问令牌".to_string())))
}

/// As [`authed`], but additionally requires the admin account.
pub fn authed_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(String, UserRecord), ApiError> {
    let (username, record) = authed(state, headers)?;
    if username != "admin" {
        return Err(ApiError(MailflowError::PermissionDenied(
            "仅管理员可执行此操作".to_string(),
        )));
    }
    Ok((username, record))
}
