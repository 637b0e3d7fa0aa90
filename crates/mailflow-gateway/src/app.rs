use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use mailflow_core::config::MailflowConfig;
use mailflow_engine::{Engine, UserPorts};
use mailflow_mailbox::InMemoryMailbox;
use mailflow_users::UserStore;
use tower_http::cors::CorsLayer;

use crate::wiring;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MailflowConfig,
    pub users: Arc<UserStore>,
    pub engine: Arc<Engine>,
    /// Per-user collaborator bundles, invalidated when settings change.
    pub ports: DashMap<String, UserPorts>,
    /// Mailbox instances per user id. In-memory backend; real transports
    /// plug in behind the same port.
    pub mailboxes: DashMap<String, Arc<InMemoryMailbox>>,
}

impl AppState {
    pub fn new(config: MailflowConfig) -> mailflow_core::Result<Self> {
        let users_dir = PathBuf::from(config.users_dir());
        let users = Arc::new(
            UserStore::open(&users_dir, &config.gateway.admin_password)
                .map_err(|e| mailflow_core::MailflowError::Persistence(e.to_string()))?,
        );
        let engine = Engine::new(&users_dir);
        Ok(Self {
            config,
            users,
            engine,
            ports: DashMap::new(),
            mailboxes: DashMap::new(),
        })
    }

    /// Collaborators for one user, built on first use and after settings
    /// changes (see [`AppState::invalidate_ports`]).
    pub fn ports_for(
        &self,
        username: &str,
    ) -> Result<UserPorts, mailflow_core::MailflowError> {
        let record = self
            .users
            .get(username)
            .ok_or_else(|| mailflow_core::MailflowError::UserNotFound(username.to_string()))?;
        let key = record.user_id.to_string();
        if let Some(ports) = self.ports.get(&key) {
            return Ok(ports.clone());
        }
        let ports = wiring::build_ports(self, &record)?;
        self.ports.insert(key, ports.clone());
        Ok(ports)
    }

    /// Drop a user's cached collaborators so the next request rebuilds them
    /// with fresh settings/models.
    pub fn invalidate_ports(&self, user_id: &str) {
        self.ports.remove(user_id);
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::misc::health))
        .route("/ws", get(crate::ws::ws_handler))
        // auth
        .route("/api/auth/register", post(crate::http::auth_routes::register))
        .route("/api/auth/login", post(crate::http::auth_routes::login))
        .route(
            "/api/auth/change-password",
            post(crate::http::auth_routes::change_password),
        )
        .route(
            "/api/auth/reset-password",
            post(crate::http::auth_routes::reset_password),
        )
        .route("/api/auth/rename", post(crate::http::auth_routes::rename))
        // emails
        .route("/api/emails", get(crate::http::emails::list))
        .route("/api/emails/refresh", post(crate::http::emails::refresh))
        .route("/api/emails/process-all", post(crate::http::emails::process_all))
        .route("/api/emails/stop-all", post(crate::http::emails::stop_all))
        .route("/api/emails/{id}/process", post(crate::http::emails::process_one))
        .route("/api/emails/{id}/stop", post(crate::http::emails::stop_one))
        .route("/api/emails/{id}/send", post(crate::http::emails::send_reply))
        .route("/api/emails/{id}/reply", post(crate::http::emails::update_reply))
        .route("/api/emails/{id}/mark-read", post(crate::http::emails::mark_read))
        .route("/api/emails/{id}/retry-rag", post(crate::http::emails::retry_rag))
        .route("/api/emails/{id}", delete(crate::http::emails::delete_one))
        // knowledge base
        .route("/api/kb/rebuild", post(crate::http::kb::rebuild))
        .route("/api/kb/documents", get(crate::http::kb::list_documents))
        .route("/api/kb/documents/{name}", delete(crate::http::kb::delete_document))
        .route("/api/kb/test", post(crate::http::kb::test_rag))
        // diagnostics
        .route("/api/test/mailbox", post(crate::http::misc::test_mailbox))
        .route("/api/test/ai", post(crate::http::misc::test_ai))
        .route("/api/summarise", post(crate::http::misc::summarise_text))
        // settings / stats / history
        .route(
            "/api/settings",
            get(crate::http::misc::get_settings).post(crate::http::misc::save_settings),
        )
        .route("/api/activities", get(crate::http::misc::activities))
        .route("/api/stats", get(crate::http::misc::stats))
        .route("/api/stats/trend", get(crate::http::misc::trend))
        .route("/api/history", get(crate::http::misc::history))
        .route("/api/history/clear", post(crate::http::misc::clear_history))
        // monitor control
        .route("/api/monitor/start", post(crate::http::monitor::start))
        .route("/api/monitor/stop", post(crate::http::monitor::stop))
        .route(
            "/api/monitor/auto-process",
            post(crate::http::monitor::toggle_auto_process),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> MailflowConfig {
        let mut cfg = MailflowConfig::default();
        cfg.storage.data_dir = dir.display().to_string();
        cfg.ai.api_key = Some("test-key".to_string());
        cfg
    }

    #[tokio::test]
    async fn state_seeds_admin_and_caches_ports() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path())).unwrap();
        assert!(state.users.get("admin").is_some());

        let ports = state.ports_for("admin").unwrap();
        assert_eq!(ports.settings.settings().batch_size, 4);
        let _again = state.ports_for("admin").unwrap();
        assert_eq!(state.ports.len(), 1);

        // Settings changes drop the cached collaborators.
        let record = state.users.get("admin").unwrap();
        state.invalidate_ports(record.user_id.as_str());
        assert_eq!(state.ports.len(), 0);
    }

    #[test]
    fn router_builds_with_all_routes() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(test_config(dir.path())).unwrap());
        let _router = build_router(state);
    }
}

