//! Per-user collaborator construction: model resolution, LLM client,
//! lazily-opened vector store, mailbox instance, settings source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailflow_core::config::EMBED_QUERY_TIMEOUT_SECS;
use mailflow_core::types::{EmailCategory, UserId, UserSettings};
use mailflow_core::MailflowError;
use mailflow_engine::ports::{ContextRetriever, SettingsSource, UserPorts};
use mailflow_kb::{ApiEmbedder, Embedder, VectorStore};
use mailflow_llm::client::EmbeddingClient;
use mailflow_llm::{models, ReplyTemplates, SiliconFlowLlm};
use mailflow_mailbox::InMemoryMailbox;
use mailflow_users::types::UserRecord;
use mailflow_users::UserStore;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::app::AppState;

/// Settings read through the user store on every access, so toggling
/// auto-process/auto-send takes effect on the next loop tick.
struct StoreSettings {
    store: Arc<UserStore>,
    user_id: UserId,
}

impl SettingsSource for StoreSettings {
    fn settings(&self) -> UserSettings {
        self.store
            .get_by_id(&self.user_id)
            .map(|(_, record)| record.settings)
            .unwrap_or_default()
    }
}

/// Retriever that opens the dimension-keyed store on first use. Dimension
/// detection may need a probe embedding, which is async and must not run
/// during request wiring.
struct LazyKbRetriever {
    base_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    store: OnceCell<Arc<VectorStore>>,
}

impl LazyKbRetriever {
    async fn store(&self) -> mailflow_engine::Result<&Arc<VectorStore>> {
        self.store
            .get_or_try_init(|| async {
                let dimension = self.embedder.dimension().await?;
                let store = VectorStore::open(&self.base_dir, dimension)?;
                if store.is_empty() {
                    warn!(
                        dim = dimension,
                        "vector store is empty — run rebuild-index to populate it"
                    );
                }
                Ok::<_, mailflow_kb::KbError>(Arc::new(store))
            })
            .await
            .map_err(mailflow_engine::EngineError::from)
    }
}

#[async_trait]
impl ContextRetriever for LazyKbRetriever {
    async fn retrieve(
        &self,
        query: &str,
        category: EmailCategory,
    ) -> mailflow_engine::Result<String> {
        let store = self.store().await?;
        Ok(mailflow_kb::retriever::retrieve_context(
            store,
            self.embedder.as_ref(),
            query,
            category,
        )
        .await?)
    }
}

/// Build the collaborator bundle for one user from their record.
pub fn build_ports(state: &AppState, record: &UserRecord) -> Result<UserPorts, MailflowError> {
    let settings = &record.settings;

    let reply = models::resolve_reply_model(&state.config.ai, settings, &record.custom_models)
        .map_err(|e| MailflowError::Llm(e.to_string()))?;
    let templates = ReplyTemplates {
        greeting: settings.greeting.clone(),
        closing: settings.closing.clone(),
        signature: settings.signature.clone(),
    };
    let llm = Arc::new(SiliconFlowLlm::new(
        reply.api_key,
        reply.base_url,
        reply.model,
        templates,
    ));

    let embedding =
        models::resolve_embedding_model(&state.config.ai, settings, &record.custom_models)
            .map_err(|e| MailflowError::Llm(e.to_string()))?;
    let embedder: Arc<dyn Embedder> = Arc::new(ApiEmbedder::new(EmbeddingClient::new(
        embedding.api_key,
        embedding.base_url,
        embedding.model,
        Duration::from_secs(EMBED_QUERY_TIMEOUT_SECS),
    )));
    let retriever = Arc::new(LazyKbRetriever {
        base_dir: PathBuf::from(&state.config.storage.data_dir),
        embedder,
        store: OnceCell::new(),
    });

    let mailbox = state
        .mailboxes
        .entry(record.user_id.to_string())
        .or_insert_with(|| Arc::new(InMemoryMailbox::new(record.email.clone())))
        .clone();

    Ok(UserPorts {
        llm,
        mailbox,
        retriever,
        settings: Arc::new(StoreSettings {
            store: state.users.clone(),
            user_id: record.user_id.clone(),
        }),
    })
}

/// Embedder for index rebuilds (longer timeout than query-time embedding).
pub fn index_embedder(state: &AppState, record: &UserRecord) -> Result<ApiEmbedder, MailflowError> {
    let embedding = models::resolve_embedding_model(
        &state.config.ai,
        &record.settings,
        &record.custom_models,
    )
    .map_err(|e| MailflowError::Llm(e.to_string()))?;
    Ok(ApiEmbedder::new(EmbeddingClient::new(
        embedding.api_key,
        embedding.base_url,
        embedding.model,
        Duration::from_secs(mailflow_core::config::EMBED_INDEX_TIMEOUT_SECS),
    )))
}
