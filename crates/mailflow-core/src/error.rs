use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Send rate limited: {0}")]
    RateLimited(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MailflowError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MailflowError::Config(_) => "CONFIG_ERROR",
            MailflowError::AuthFailed(_) => "AUTH_FAILED",
            MailflowError::UserNotFound(_) => "USER_NOT_FOUND",
            MailflowError::PermissionDenied(_) => "PERMISSION_DENIED",
            MailflowError::RateLimited(_) => "RATE_LIMITED",
            MailflowError::Mailbox(_) => "MAILBOX_ERROR",
            MailflowError::Llm(_) => "LLM_PROVIDER_ERROR",
            MailflowError::Knowledge(_) => "KNOWLEDGE_ERROR",
            MailflowError::Persistence(_) => "PERSISTENCE_ERROR",
            MailflowError::Serialization(_) => "SERIALIZATION_ERROR",
            MailflowError::Io(_) => "IO_ERROR",
            MailflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MailflowError>;
