//! Per-user collaborator bundle handed to the orchestrator and pipeline.
//!
//! Everything behind a trait object so tests script the collaborators and
//! the gateway wires real implementations per user (models and mailboxes
//! differ between users).

use std::sync::Arc;

use async_trait::async_trait;
use mailflow_core::types::{EmailCategory, UserSettings};
use mailflow_kb::{Embedder, VectorStore};
use mailflow_llm::SupportLlm;
use mailflow_mailbox::MailboxPort;

use crate::error::Result;

/// Current settings for a user. Re-read every loop tick so toggling
/// auto-process/auto-send takes effect without restarting the monitor.
pub trait SettingsSource: Send + Sync {
    fn settings(&self) -> UserSettings;
}

/// Mutable in-memory settings, for tests and mailbox-less setups.
pub struct StaticSettings(pub std::sync::Mutex<UserSettings>);

impl StaticSettings {
    pub fn new(settings: UserSettings) -> Arc<Self> {
        Arc::new(Self(std::sync::Mutex::new(settings)))
    }

    pub fn update(&self, f: impl FnOnce(&mut UserSettings)) {
        f(&mut self.0.lock().unwrap());
    }
}

impl SettingsSource for StaticSettings {
    fn settings(&self) -> UserSettings {
        self.0.lock().unwrap().clone()
    }
}

/// Knowledge-base context lookup for one query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, category: EmailCategory) -> Result<String>;
}

/// Production retriever over the dimension-keyed vector store.
pub struct KbRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl KbRetriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl ContextRetriever for KbRetriever {
    async fn retrieve(&self, query: &str, category: EmailCategory) -> Result<String> {
        Ok(mailflow_kb::retriever::retrieve_context(
            &self.store,
            self.embedder.as_ref(),
            query,
            category,
        )
        .await?)
    }
}

/// Retriever for users without an index: drafts proceed on the email text
/// alone.
pub struct NullRetriever;

#[async_trait]
impl ContextRetriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _category: EmailCategory) -> Result<String> {
        Ok(String::new())
    }
}

/// The full collaborator set for one user.
#[derive(Clone)]
pub struct UserPorts {
    pub llm: Arc<dyn SupportLlm>,
    pub mailbox: Arc<dyn MailboxPort>,
    pub retriever: Arc<dyn ContextRetriever>,
    pub settings: Arc<dyn SettingsSource>,
}
