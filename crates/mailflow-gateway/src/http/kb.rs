use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::auth::{authed, ApiError};
use crate::http::ok;
use crate::wiring;

#[derive(Deserialize, Default)]
pub struct RebuildBody {
    /// Restrict the rebuild to one document.
    #[serde(default)]
    pub file: Option<String>,
}

/// Rebuild the vector index for the user's embedding model. The store
/// directory is keyed by the detected dimension; older dimensions remain
/// on disk untouched.
pub async fn rebuild(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RebuildBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, record) = authed(&state, &headers)?;
    let embedder = wiring::index_embedder(&state, &record)?;
    let base_dir = PathBuf::from(&state.config.storage.data_dir);
    let knowledge_dir = PathBuf::from(&state.config.storage.knowledge_dir);
    let file = body.and_then(|b| b.0.file);

    let outcome = mailflow_kb::index::build_index(
        &embedder,
        &base_dir,
        &knowledge_dir,
        file.as_deref(),
    )
    .await?;
    // Cached retrievers point at the previous store; rebuild invalidates.
    state.invalidate_ports(record.user_id.as_str());
    info!(user = %username, dim = outcome.dimension, chunks = outcome.chunks, "index rebuilt");
    Ok(ok(serde_json::json!({
        "db_path": outcome.db_path.display().to_string(),
        "dimension": outcome.dimension,
        "chunks": outcome.chunks,
    })))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed(&state, &headers)?;
    let docs = mailflow_kb::index::list_documents(&PathBuf::from(&state.config.storage.knowledge_dir))?;
    Ok(ok(serde_json::json!({"documents": docs})))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed(&state, &headers)?;
    mailflow_kb::index::delete_document(
        &PathBuf::from(&state.config.storage.knowledge_dir),
        &name,
    )?;
    Ok(ok(serde_json::json!({"deleted": name})))
}

#[derive(Deserialize)]
pub struct RagTestBody {
    pub question: String,
}

/// Retrieval self-test: retrieve + compose for an ad-hoc question.
pub async fn test_rag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RagTestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (username, record) = authed(&state, &headers)?;
    let ports = state.ports_for(&username)?;
    let handle = state.engine.registry.handle(&record.user_id, &[]);
    let answer = state
        .engine
        .rag_test(&handle, &ports, &body.question)
        .await?;
    Ok(ok(serde_json::json!({"question": body.question, "answer": answer})))
}
