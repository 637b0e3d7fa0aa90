use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parse;

/// One unread message as produced by a mailbox backend, already filtered
/// and normalised (see [`crate::parse`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Message-ID header, or `email_{seq}` when the header is absent.
    pub id: String,
    pub thread_id: String,
    pub message_id: String,
    pub references: String,
    /// Bare address, angle brackets and display name removed.
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Opaque backend sequence used for mark-read. Never interpreted by
    /// callers.
    pub mailbox_seq: String,
}

/// A threaded reply ready for the outbound side of a mailbox backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: String,
    pub references: String,
}

impl OutboundReply {
    /// Build a reply to an inbound message: "Re: " subject, `In-Reply-To`
    /// set to the original Message-ID, `References` extended (or seeded
    /// from the Message-ID when the original carried none).
    pub fn replying_to(
        sender: &str,
        subject: &str,
        message_id: &str,
        references: &str,
        body: impl Into<String>,
    ) -> Self {
        let references = if message_id.is_empty() {
            references.to_string()
        } else if references.is_empty() {
            message_id.to_string()
        } else {
            format!("{} {}", references, message_id)
        };
        Self {
            to: parse::extract_address(sender).unwrap_or_else(|| sender.to_string()),
            subject: parse::reply_subject(subject),
            body: body.into(),
            in_reply_to: message_id.to_string(),
            references,
        }
    }
}

/// Thin port over a mailbox backend. Implementations own all transport
/// detail; callers only see normalised messages and success/failure.
#[async_trait]
pub trait MailboxPort: Send + Sync {
    /// Backend label for logging and the connectivity self-test.
    fn name(&self) -> &str;

    /// Fetch up to `max` unread messages received in the recent window
    /// (backends use "since 8 hours ago"). Own sends and empty bodies are
    /// already filtered out.
    async fn fetch_unread(&self, max: usize) -> Result<Vec<InboundEmail>>;

    /// Deliver a reply. An `Err` here must leave no rate-limit budget
    /// consumed — callers commit only after `Ok`.
    async fn send_reply(&self, reply: &OutboundReply) -> Result<()>;

    /// Mark a message read by its opaque sequence. Best-effort: callers log
    /// and continue on failure. Non-numeric sequences are rejected.
    async fn mark_read(&self, seq: &str) -> Result<()>;

    /// Connectivity self-test for the settings page.
    async fn check_connection(&self) -> Result<()> {
        self.fetch_unread(1).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_threads_headers() {
        let r = OutboundReply::replying_to(
            "客户 <c@example.com>",
            "产品咨询",
            "<mid-1@qq.com>",
            "",
            "回复内容",
        );
        assert_eq!(r.to, "c@example.com");
        assert_eq!(r.subject, "Re: 产品咨询");
        assert_eq!(r.in_reply_to, "<mid-1@qq.com>");
        assert_eq!(r.references, "<mid-1@qq.com>");
    }

    #[test]
    fn reply_extends_existing_references() {
        let r = OutboundReply::replying_to(
            "c@example.com",
            "s",
            "<mid-2@qq.com>",
            "<mid-1@qq.com>",
            "body",
        );
        assert_eq!(r.references, "<mid-1@qq.com> <mid-2@qq.com>");
    }
}
