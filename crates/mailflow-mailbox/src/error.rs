use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox connection failed: {0}")]
    Connect(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("无效的邮件序列号格式: {0}")]
    InvalidSequence(String),
}

pub type Result<T> = std::result::Result<T, MailboxError>;
