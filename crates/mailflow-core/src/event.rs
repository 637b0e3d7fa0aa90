use serde::{Deserialize, Serialize};
use std::fmt;

/// Every event type the bus can fan out to subscribed sessions.
///
/// Wire names are stable — clients switch on the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewEmails,
    EmailProcessStarted,
    RagQueriesGenerated,
    EmailProcessComplete,
    EmailProcessStopping,
    EmailProcessStopped,
    ProcessAllStopping,
    ProcessAllStopped,
    ProcessAllComplete,
    AutoProcessComplete,
    SummarySaved,
    RagTestComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::NewEmails => "new_emails",
            EventKind::EmailProcessStarted => "email_process_started",
            EventKind::RagQueriesGenerated => "rag_queries_generated",
            EventKind::EmailProcessComplete => "email_process_complete",
            EventKind::EmailProcessStopping => "email_process_stopping",
            EventKind::EmailProcessStopped => "email_process_stopped",
            EventKind::ProcessAllStopping => "process_all_stopping",
            EventKind::ProcessAllStopped => "process_all_stopped",
            EventKind::ProcessAllComplete => "process_all_complete",
            EventKind::AutoProcessComplete => "auto_process_complete",
            EventKind::SummarySaved => "summary_saved",
            EventKind::RagTestComplete => "rag_test_complete",
        };
        write!(f, "{}", s)
    }
}

/// One typed event as delivered over the WS channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event: EventKind,
    pub data: serde_json::Value,
    pub time: String,
}

impl Event {
    pub fn new(event: EventKind, data: serde_json::Value) -> Self {
        Self {
            event,
            data,
            time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_wire_names() {
        let json = serde_json::to_string(&EventKind::EmailProcessStopped).unwrap();
        assert_eq!(json, r#""email_process_stopped""#);
        assert_eq!(EventKind::NewEmails.to_string(), "new_emails");
        assert_eq!(EventKind::RagTestComplete.to_string(), "rag_test_complete");
    }

    #[test]
    fn event_serializes_flat() {
        let ev = Event::new(EventKind::NewEmails, serde_json::json!({"count": 3}));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"new_emails""#));
        assert!(json.contains(r#""count":3"#));
    }
}
