use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("用户不存在: {0}")]
    NotFound(String),

    #[error("{0}")]
    AuthFailed(String),

    #[error("用户名已存在: {0}")]
    UsernameTaken(String),

    #[error("用户名映射会形成循环: {old} -> {new}")]
    MappingCycle { old: String, new: String },

    #[error("Password hash error: {0}")]
    PasswordHash(String),

    #[error("Persistence error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UserError>;
