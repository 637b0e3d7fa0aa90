//! In-memory mailbox used by tests and by users without a configured
//! transport. Honours the same filtering contract as a real backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MailboxError, Result};
use crate::parse;
use crate::port::{InboundEmail, MailboxPort, OutboundReply};

pub struct InMemoryMailbox {
    own_address: String,
    unread: Mutex<Vec<InboundEmail>>,
    sent: Mutex<Vec<OutboundReply>>,
    read_seqs: Mutex<HashSet<String>>,
    fail_sends: AtomicBool,
}

impl InMemoryMailbox {
    pub fn new(own_address: impl Into<String>) -> Self {
        Self {
            own_address: own_address.into(),
            unread: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            read_seqs: Mutex::new(HashSet::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Queue a message for the next fetch.
    pub fn push(&self, email: InboundEmail) {
        self.unread.lock().unwrap().push(email);
    }

    /// Everything delivered through `send_reply` so far.
    pub fn sent(&self) -> Vec<OutboundReply> {
        self.sent.lock().unwrap().clone()
    }

    /// Sequences flagged read so far.
    pub fn read_seqs(&self) -> HashSet<String> {
        self.read_seqs.lock().unwrap().clone()
    }

    /// Make subsequent sends fail (rate-limit commit tests rely on this).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Remove a message from the unread queue (e.g. after it was read
    /// elsewhere), mirroring a backend whose unread set shrank.
    pub fn remove_unread(&self, id: &str) {
        self.unread.lock().unwrap().retain(|m| m.id != id);
    }
}

#[async_trait]
impl MailboxPort for InMemoryMailbox {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_unread(&self, max: usize) -> Result<Vec<InboundEmail>> {
        let unread = self.unread.lock().unwrap();
        let read = self.read_seqs.lock().unwrap();
        let out: Vec<InboundEmail> = unread
            .iter()
            .filter(|m| !read.contains(&m.mailbox_seq))
            .filter(|m| parse::should_process(&self.own_address, &m.sender, &m.body))
            .take(max)
            .cloned()
            .collect();
        debug!(count = out.len(), "fetched unread from memory mailbox");
        Ok(out)
    }

    async fn send_reply(&self, reply: &OutboundReply) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MailboxError::Send("injected send failure".to_string()));
        }
        if reply.to.is_empty() || !reply.to.contains('@') {
            return Err(MailboxError::Send(format!(
                "无效的收件人地址格式: {}",
                reply.to
            )));
        }
        self.sent.lock().unwrap().push(reply.clone());
        Ok(())
    }

    async fn mark_read(&self, seq: &str) -> Result<()> {
        if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) {
            return Err(MailboxError::InvalidSequence(seq.to_string()));
        }
        // Second call is a visible no-op — the set absorbs duplicates.
        self.read_seqs.lock().unwrap().insert(seq.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(id: &str, seq: &str, sender: &str, body: &str) -> InboundEmail {
        InboundEmail {
            id: id.to_string(),
            thread_id: String::new(),
            message_id: format!("<{id}@test>"),
            references: String::new(),
            sender: sender.to_string(),
            subject: "s".to_string(),
            body: body.to_string(),
            mailbox_seq: seq.to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_filters_own_and_empty_and_read() {
        let mb = InMemoryMailbox::new("me@qq.com");
        mb.push(inbound("a", "1", "c@x.com", "hello"));
        mb.push(inbound("b", "2", "me@qq.com", "own send"));
        mb.push(inbound("c", "3", "d@x.com", "  "));
        mb.push(inbound("d", "4", "e@x.com", "more"));
        mb.mark_read("4").await.unwrap();

        let got = mb.fetch_unread(10).await.unwrap();
        let ids: Vec<_> = got.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn fetch_respects_max() {
        let mb = InMemoryMailbox::new("me@qq.com");
        for i in 0..5 {
            mb.push(inbound(&format!("m{i}"), &i.to_string(), "c@x.com", "body"));
        }
        assert_eq!(mb.fetch_unread(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mark_read_rejects_non_numeric_and_is_idempotent() {
        let mb = InMemoryMailbox::new("me@qq.com");
        assert!(matches!(
            mb.mark_read("b'89'").await,
            Err(MailboxError::InvalidSequence(_))
        ));
        mb.mark_read("89").await.unwrap();
        mb.mark_read("89").await.unwrap();
        assert_eq!(mb.read_seqs().len(), 1);
    }

    #[tokio::test]
    async fn injected_send_failure_surfaces() {
        let mb = InMemoryMailbox::new("me@qq.com");
        let reply = OutboundReply::replying_to("c@x.com", "s", "<m@x>", "", "body");
        mb.set_fail_sends(true);
        assert!(mb.send_reply(&reply).await.is_err());
        mb.set_fail_sends(false);
        mb.send_reply(&reply).await.unwrap();
        assert_eq!(mb.sent().len(), 1);
    }
}
