use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Operational constants shared across the workspace.
pub const DEFAULT_PORT: u16 = 18080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Hard cap on unread messages ingested per monitor cycle.
pub const MAX_FETCH_PER_CYCLE: usize = 100;
/// Cadence of the auto-send sweep, independent of the monitor interval.
pub const AUTO_SEND_TICK_SECS: u64 = 30;
/// Stop flags auto-clear this long after a stop request; must exceed the
/// worst-case checkpoint-to-checkpoint interval (~2 min for slow retrieval).
pub const STOP_FLAG_CLEAR_SECS: u64 = 300;
/// Maximum draft/proofread cycles per message.
pub const DRAFT_MAX_TRIALS: u32 = 3;
/// Fixed size of the summariser pool.
pub const SUMMARY_POOL_SIZE: usize = 15;
/// Chat request timeout for classify/draft/proofread calls.
pub const LLM_REQUEST_TIMEOUT_SECS: u64 = 90;
/// Embedding timeout for single-query embedding.
pub const EMBED_QUERY_TIMEOUT_SECS: u64 = 60;
/// Embedding timeout while building an index (larger batches).
pub const EMBED_INDEX_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_REPLY_MODEL: &str = "moonshotai/Kimi-K2-Thinking";
pub const DEFAULT_EMBEDDING_MODEL: &str = "Qwen/Qwen3-Embedding-4B";
pub const DEFAULT_API_BASE: &str = "https://api.siliconflow.cn/v1";

/// Top-level config (mailflow.toml + MAILFLOW_* env overrides).
///
/// A handful of legacy environment variables from the original deployment
/// (`SILICONFLOW_API_KEY`, `REPLY_MODEL`, `EMBEDDING_MODEL`,
/// `KNOWLEDGE_DATA_DIR`) are honoured after extraction so existing .env
/// files keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailflowConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for MailflowConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            ai: AiConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Password seeded for the admin account on first start.
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            admin_password: default_admin_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Default API key for the SiliconFlow-compatible endpoint.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_reply_model")]
    pub reply_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            reply_model: default_reply_model(),
            embedding_model: default_embedding_model(),
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for persisted state; user files live under `<data_dir>/users`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory of plain-text knowledge documents.
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            knowledge_dir: default_knowledge_dir(),
        }
    }
}

impl MailflowConfig {
    /// Load config from a TOML file with MAILFLOW_* env var overrides,
    /// then apply the legacy env vars on top.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| "mailflow.toml".to_string());

        let mut config: MailflowConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MAILFLOW_").split("_"))
            .extract()
            .map_err(|e| crate::error::MailflowError::Config(e.to_string()))?;

        if let Ok(key) = std::env::var("SILICONFLOW_API_KEY") {
            if !key.is_empty() {
                config.ai.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("REPLY_MODEL") {
            if !model.is_empty() {
                config.ai.reply_model = model;
            }
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            if !model.is_empty() {
                config.ai.embedding_model = model;
            }
        }
        if let Ok(dir) = std::env::var("KNOWLEDGE_DATA_DIR") {
            if !dir.is_empty() {
                config.storage.knowledge_dir = dir;
            }
        }

        Ok(config)
    }

    /// Directory holding user_data.json and the per-user email-data files.
    pub fn users_dir(&self) -> String {
        format!("{}/users", self.storage.data_dir)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_admin_password() -> String {
    "admin123".to_string()
}
fn default_reply_model() -> String {
    DEFAULT_REPLY_MODEL.to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_knowledge_dir() -> String {
    "data/knowledge".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = MailflowConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.ai.reply_model, DEFAULT_REPLY_MODEL);
        assert_eq!(cfg.ai.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.users_dir(), "data/users");
    }
}
