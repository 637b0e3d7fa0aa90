use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("未找到 API 密钥，请在系统设置中配置或设置 SILICONFLOW_API_KEY 环境变量")]
    MissingApiKey,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Transient errors are worth a retry; the rest fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
