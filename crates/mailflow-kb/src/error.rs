use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    #[error("没有找到可索引的文档")]
    NoDocuments,

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("vector dimension mismatch: store is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding error: {0}")]
    Embedding(#[from] mailflow_llm::LlmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KbError>;
