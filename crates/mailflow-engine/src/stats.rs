//! Derived statistics over cache + history.
//!
//! Counters are recomputed on every request, deduplicating by message id,
//! so they survive restarts and cache culls without drift. The persisted
//! `sent` counter only bridges sends not yet reflected in cache/history.

use std::collections::HashMap;

use chrono::{Datelike, Duration, Utc};
use mailflow_core::types::{EmailCategory, EmailStatus};
use serde::Serialize;

use crate::state::UserData;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DerivedStats {
    pub today_emails: u64,
    pub processed: u64,
    pub pending: u64,
    pub failed: u64,
    pub sent: u64,
    pub this_month_processed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub received: u64,
    pub processed: u64,
}

struct Entry<'a> {
    received_at: &'a str,
    status: EmailStatus,
    category: Option<EmailCategory>,
    /// History timestamp when available, else the receive time.
    processed_at: &'a str,
    in_cache: bool,
}

fn dedup_entries(data: &UserData) -> Vec<Entry<'_>> {
    let mut by_id: HashMap<&str, Entry<'_>> = HashMap::new();
    for m in &data.cache {
        by_id.insert(
            m.id.as_str(),
            Entry {
                received_at: &m.received_at,
                status: m.status,
                category: m.category,
                processed_at: &m.received_at,
                in_cache: true,
            },
        );
    }
    for r in &data.history {
        by_id
            .entry(r.email.id.as_str())
            .and_modify(|e| {
                // Cache entry wins for status; history supplies the
                // processing timestamp.
                e.processed_at = &r.processed_time;
            })
            .or_insert(Entry {
                received_at: &r.email.received_at,
                status: r.email.status,
                category: r.email.category,
                processed_at: &r.processed_time,
                in_cache: false,
            });
    }
    by_id.into_values().collect()
}

fn is_processed(status: EmailStatus) -> bool {
    matches!(
        status,
        EmailStatus::Processed | EmailStatus::Sent | EmailStatus::Skipped
    )
}

fn date_prefix(ts: &str) -> &str {
    if ts.len() >= 10 {
        &ts[..10]
    } else {
        ts
    }
}

/// Full counter recomputation.
pub fn compute(data: &UserData) -> DerivedStats {
    let now = Utc::now();
    let today = now.format("%Y-%m-%d").to_string();
    let month = format!("{:04}-{:02}", now.year(), now.month());

    let entries = dedup_entries(data);
    let mut stats = DerivedStats::default();
    for e in &entries {
        if date_prefix(e.received_at) == today {
            stats.today_emails += 1;
        }
        if is_processed(e.status) {
            stats.processed += 1;
            if date_prefix(e.processed_at).starts_with(&month) {
                stats.this_month_processed += 1;
            }
        }
        if e.in_cache && e.status == EmailStatus::Pending {
            stats.pending += 1;
        }
        if e.status == EmailStatus::Failed {
            stats.failed += 1;
        }
        if e.status == EmailStatus::Sent {
            stats.sent += 1;
        }
    }
    // A just-committed send may not be flushed into cache/history yet.
    stats.sent = stats.sent.max(data.stats.sent);
    stats
}

/// Today's message count per category.
pub fn category_stats_today(data: &UserData) -> HashMap<String, u64> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut counts = HashMap::new();
    for e in dedup_entries(data) {
        if date_prefix(e.received_at) == today {
            if let Some(cat) = e.category {
                *counts.entry(cat.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Per-day received/processed counts for the last `days` days, oldest
/// first.
pub fn trend(data: &UserData, days: u32) -> Vec<TrendPoint> {
    let now = Utc::now();
    let entries = dedup_entries(data);
    (0..days)
        .rev()
        .map(|back| {
            let date = (now - Duration::days(back as i64))
                .format("%Y-%m-%d")
                .to_string();
            let received = entries
                .iter()
                .filter(|e| date_prefix(e.received_at) == date)
                .count() as u64;
            let processed = entries
                .iter()
                .filter(|e| is_processed(e.status) && date_prefix(e.processed_at) == date)
                .count() as u64;
            TrendPoint {
                date,
                received,
                processed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailflow_core::types::{EmailMessage, HistoryRecord};

    fn message(id: &str, status: EmailStatus, category: Option<EmailCategory>) -> EmailMessage {
        let mut m = EmailMessage::ingested(id, "c@x.com", format!("s-{id}"), "body");
        m.status = status;
        m.category = category;
        m
    }

    #[test]
    fn counts_statuses_with_dedup() {
        let mut data = UserData::default();
        data.cache.push(message("p1", EmailStatus::Pending, None));
        data.cache.push(message(
            "d1",
            EmailStatus::Processed,
            Some(EmailCategory::ProductEnquiry),
        ));
        data.cache.push(message("f1", EmailStatus::Failed, None));
        // d1 also appears in history — must not double count.
        data.history.push(HistoryRecord::now(message(
            "d1",
            EmailStatus::Processed,
            Some(EmailCategory::ProductEnquiry),
        )));
        data.history.push(HistoryRecord::now(message(
            "s1",
            EmailStatus::Sent,
            Some(EmailCategory::CustomerComplaint),
        )));

        let stats = compute(&data);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processed, 2); // d1 + s1
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.today_emails, 4);
        assert_eq!(stats.this_month_processed, 2);
    }

    #[test]
    fn sent_counter_bridges_unflushed_sends() {
        let mut data = UserData::default();
        data.stats.sent = 5;
        let stats = compute(&data);
        assert_eq!(stats.sent, 5);
    }

    #[test]
    fn category_stats_restrict_to_today() {
        let mut data = UserData::default();
        let mut old = message(
            "old",
            EmailStatus::Processed,
            Some(EmailCategory::ProductEnquiry),
        );
        old.received_at = "2001-01-01T00:00:00Z".to_string();
        data.cache.push(old);
        data.cache.push(message(
            "new",
            EmailStatus::Processed,
            Some(EmailCategory::CustomerFeedback),
        ));

        let counts = category_stats_today(&data);
        assert_eq!(counts.get("customer_feedback"), Some(&1));
        assert!(!counts.contains_key("product_enquiry"));
    }

    #[test]
    fn trend_covers_requested_days_in_order() {
        let mut data = UserData::default();
        data.cache.push(message("m", EmailStatus::Processed, None));
        let points = trend(&data, 7);
        assert_eq!(points.len(), 7);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(points.last().unwrap().date, today);
        assert_eq!(points.last().unwrap().received, 1);
        assert_eq!(points[0].received, 0);
    }
}
