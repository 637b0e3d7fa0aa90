use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("邮件不存在: {0}")]
    EmailNotFound(String),

    #[error("邮件正在处理中: {0}")]
    EmailBusy(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("mailbox error: {0}")]
    Mailbox(#[from] mailflow_mailbox::MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] mailflow_llm::LlmError),

    #[error("knowledge base error: {0}")]
    Knowledge(#[from] mailflow_kb::KbError),

    #[error("persistence error: {0}")]
    Persistence(#[from] mailflow_users::UserError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
