use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a user (UUIDv7 — time-sortable for easier log correlation).
///
/// The id is generated once at registration and never reused. All per-user
/// data files are named by this id, so renaming a user never moves data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of one message inside a user's cache.
///
/// `stopping` is the visible intermediate state between a stop request and
/// the next pipeline checkpoint; the checkpoint reverts it to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    #[default]
    Pending,
    Processing,
    Stopping,
    Processed,
    Sent,
    Skipped,
    Failed,
    Read,
}

impl EmailStatus {
    /// Terminal states are eligible for history and survive monitor reconciliation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EmailStatus::Processed | EmailStatus::Sent | EmailStatus::Skipped | EmailStatus::Failed
        )
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Processing => "processing",
            EmailStatus::Stopping => "stopping",
            EmailStatus::Processed => "processed",
            EmailStatus::Sent => "sent",
            EmailStatus::Skipped => "skipped",
            EmailStatus::Failed => "failed",
            EmailStatus::Read => "read",
        };
        write!(f, "{}", s)
    }
}

/// Intent category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    ProductEnquiry,
    CustomerComplaint,
    CustomerFeedback,
    Unrelated,
}

impl fmt::Display for EmailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmailCategory::ProductEnquiry => "product_enquiry",
            EmailCategory::CustomerComplaint => "customer_complaint",
            EmailCategory::CustomerFeedback => "customer_feedback",
            EmailCategory::Unrelated => "unrelated",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EmailCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "product_enquiry" => Ok(EmailCategory::ProductEnquiry),
            "customer_complaint" => Ok(EmailCategory::CustomerComplaint),
            "customer_feedback" => Ok(EmailCategory::CustomerFeedback),
            "unrelated" => Ok(EmailCategory::Unrelated),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Keyword-driven urgency annotation, computed at ingestion and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Urgent => "urgent",
        };
        write!(f, "{}", s)
    }
}

/// One email in a user's cache, from ingestion through terminal status.
///
/// Field names follow the persisted JSON layout; `mailbox_seq` is the opaque
/// backend sequence used for mark-read and is never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub references: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub mailbox_seq: String,
    #[serde(default)]
    pub received_at: String,
    #[serde(default)]
    pub status: EmailStatus,
    #[serde(default)]
    pub category: Option<EmailCategory>,
    #[serde(default)]
    pub urgency: UrgencyLevel,
    #[serde(default)]
    pub urgency_keywords: Vec<String>,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub rag_queries: Vec<String>,
    #[serde(default)]
    pub body_summary: Option<String>,
    #[serde(default)]
    pub reply_summary: Option<String>,
}

impl EmailMessage {
    /// A fresh pending message as produced by mailbox ingestion.
    pub fn ingested(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: String::new(),
            message_id: String::new(),
            references: String::new(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            mailbox_seq: String::new(),
            received_at: chrono::Utc::now().to_rfc3339(),
            status: EmailStatus::Pending,
            category: None,
            urgency: UrgencyLevel::Low,
            urgency_keywords: Vec::new(),
            reply: None,
            rag_queries: Vec::new(),
            body_summary: None,
            reply_summary: None,
        }
    }
}

/// Post-terminal snapshot of a message, prepended to the per-user history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub email: EmailMessage,
    pub processed_time: String,
}

impl HistoryRecord {
    pub fn now(email: EmailMessage) -> Self {
        Self {
            email,
            processed_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Severity tag on an activity-feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Terse audit record shown in the per-user activity feed (ring of 50).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub time: String,
    pub level: ActivityLevel,
    pub icon: String,
    pub text: String,
}

impl Activity {
    pub fn new(level: ActivityLevel, icon: &str, text: impl Into<String>) -> Self {
        Self {
            time: chrono::Utc::now().to_rfc3339(),
            level,
            icon: icon.to_string(),
            text: text.into(),
        }
    }
}

/// Whether a custom model serves reply drafting or embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Reply,
    Embedding,
}

/// A user-supplied model descriptor overriding the built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModel {
    pub provider: String,
    pub model_id: String,
    pub api_key: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Per-user AI and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub reply_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub auto_process: bool,
    #[serde(default)]
    pub auto_send: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_mins: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_single_concurrency")]
    pub single_concurrency: usize,
    #[serde(default = "default_signature")]
    pub signature: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_closing")]
    pub closing: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            reply_model: None,
            embedding_model: None,
            auto_process: false,
            auto_send: false,
            check_interval_mins: default_check_interval(),
            batch_size: default_batch_size(),
            single_concurrency: default_single_concurrency(),
            signature: default_signature(),
            greeting: default_greeting(),
            closing: default_closing(),
        }
    }
}

impl UserSettings {
    /// Batch size clamped to [1, 30].
    pub fn batch_size_clamped(&self) -> usize {
        self.batch_size.clamp(1, 30)
    }

    /// Single-item concurrency clamped to [2, 20].
    pub fn single_concurrency_clamped(&self) -> usize {
        self.single_concurrency.clamp(2, 20)
    }
}

fn default_check_interval() -> u64 {
    15
}
fn default_batch_size() -> usize {
    4
}
fn default_single_concurrency() -> usize {
    4
}
fn default_signature() -> String {
    "Agentia 团队".to_string()
}
fn default_greeting() -> String {
    "尊敬的客户，您好！".to_string()
}
fn default_closing() -> String {
    "祝好！".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_round_trip() {
        let json = serde_json::to_string(&EmailStatus::Processed).unwrap();
        assert_eq!(json, r#""processed""#);
        let back: EmailStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EmailStatus::Processed);
    }

    #[test]
    fn category_wire_names() {
        assert_eq!(EmailCategory::ProductEnquiry.to_string(), "product_enquiry");
        assert_eq!(
            "customer_complaint".parse::<EmailCategory>().unwrap(),
            EmailCategory::CustomerComplaint
        );
        assert!("junk".parse::<EmailCategory>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(EmailStatus::Skipped.is_terminal());
        assert!(EmailStatus::Sent.is_terminal());
        assert!(!EmailStatus::Pending.is_terminal());
        assert!(!EmailStatus::Stopping.is_terminal());
        assert!(!EmailStatus::Read.is_terminal());
    }

    #[test]
    fn settings_clamps() {
        let mut s = UserSettings::default();
        s.batch_size = 100;
        s.single_concurrency = 1;
        assert_eq!(s.batch_size_clamped(), 30);
        assert_eq!(s.single_concurrency_clamped(), 2);
    }

    #[test]
    fn message_defaults_survive_sparse_json() {
        let m: EmailMessage = serde_json::from_str(
            r#"{"id":"m1","sender":"a@b.com","subject":"hi","body":"text"}"#,
        )
        .unwrap();
        assert_eq!(m.status, EmailStatus::Pending);
        assert_eq!(m.urgency, UrgencyLevel::Low);
        assert!(m.category.is_none());
    }
}
