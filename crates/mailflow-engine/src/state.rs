use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use mailflow_core::types::{
    Activity, ActivityLevel, EmailMessage, HistoryRecord, UserId,
};
use mailflow_users::email_data::{
    load_email_data, save_email_data, EmailDataFile, StatCounters,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cancel::StopFlags;

/// Activity feed bound.
pub const ACTIVITY_RING: usize = 50;

/// In-memory working state for one user, guarded by the user lock.
#[derive(Debug, Default)]
pub struct UserData {
    /// Live messages plus recently-terminal ones (kept until an explicit
    /// delete or a refresh culls them).
    pub cache: Vec<EmailMessage>,
    /// Newest first.
    pub history: Vec<HistoryRecord>,
    /// Newest first, bounded to [`ACTIVITY_RING`].
    pub activities: VecDeque<Activity>,
    pub stats: StatCounters,
    pub last_check_time: Option<String>,
    /// Mirrors of the user's settings, persisted with the data file so the
    /// on-disk layout round-trips.
    pub auto_process: bool,
    pub check_interval: Option<u64>,
}

impl UserData {
    pub fn find(&self, email_id: &str) -> Option<&EmailMessage> {
        self.cache.iter().find(|m| m.id == email_id)
    }

    pub fn find_mut(&mut self, email_id: &str) -> Option<&mut EmailMessage> {
        self.cache.iter_mut().find(|m| m.id == email_id)
    }

    pub fn push_activity(&mut self, level: ActivityLevel, icon: &str, text: impl Into<String>) {
        self.activities.push_front(Activity::new(level, icon, text));
        self.activities.truncate(ACTIVITY_RING);
    }

    /// Record a terminal snapshot in history.
    ///
    /// An existing record for the same id — or, failing that, the same
    /// (subject, sender) pair — is updated in place (the resend path);
    /// otherwise the snapshot is prepended.
    pub fn record_history(&mut self, email: EmailMessage) {
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(existing) = self.history.iter_mut().find(|r| r.email.id == email.id) {
            existing.email = email;
            existing.processed_time = now;
            return;
        }
        if let Some(existing) = self
            .history
            .iter_mut()
            .find(|r| r.email.subject == email.subject && r.email.sender == email.sender)
        {
            existing.email = email;
            existing.processed_time = now;
            return;
        }
        self.history.insert(0, HistoryRecord::now(email));
    }

    fn from_file(file: EmailDataFile) -> Self {
        Self {
            cache: file.emails_cache,
            history: file.history,
            activities: file.activities.into(),
            stats: file.stats,
            last_check_time: file.last_check_time,
            auto_process: file.auto_process,
            check_interval: file.check_interval,
        }
    }

    fn to_file(&self) -> EmailDataFile {
        EmailDataFile {
            emails_cache: self.cache.clone(),
            history: self.history.clone(),
            activities: self.activities.iter().cloned().collect(),
            stats: self.stats.clone(),
            last_check_time: self.last_check_time.clone(),
            auto_process: self.auto_process,
            check_interval: self.check_interval,
        }
    }
}

/// The supervising task of a running monitor: a shared cancellation token
/// plus the child join handles (monitor loop, auto-send loop).
pub struct MonitorTask {
    pub token: CancellationToken,
    pub children: Vec<tokio::task::JoinHandle<()>>,
}

/// Shared handle to one user's runtime state.
///
/// The async mutex is the "user lock": every cache/history/stat mutation
/// happens under it, and it is never held across LLM, mailbox, or
/// retrieval I/O (persistence excepted — local and short).
pub struct UserHandle {
    pub user_id: UserId,
    pub data: tokio::sync::Mutex<UserData>,
    pub flags: StopFlags,
    pub monitor_running: AtomicBool,
    pub auto_send_running: AtomicBool,
    /// Present while the monitor is running; cancelling its token stops
    /// both children.
    pub monitor_task: std::sync::Mutex<Option<MonitorTask>>,
}

/// Lookup map of user handles, keyed by stable user id.
///
/// Handle creation is double-checked via the map's entry API; state is
/// loaded from disk on first access (with legacy-filename migration).
pub struct UserRegistry {
    users_dir: PathBuf,
    handles: DashMap<String, Arc<UserHandle>>,
}

impl UserRegistry {
    pub fn new(users_dir: impl Into<PathBuf>) -> Self {
        Self {
            users_dir: users_dir.into(),
            handles: DashMap::new(),
        }
    }

    pub fn users_dir(&self) -> &PathBuf {
        &self.users_dir
    }

    /// Get or create the handle for a user. `legacy_usernames` are prior
    /// handles whose old-format data files should be migrated on first
    /// load.
    pub fn handle(&self, user_id: &UserId, legacy_usernames: &[&str]) -> Arc<UserHandle> {
        self.handles
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let file = load_email_data(&self.users_dir, user_id, legacy_usernames);
                Arc::new(UserHandle {
                    user_id: user_id.clone(),
                    data: tokio::sync::Mutex::new(UserData::from_file(file)),
                    flags: StopFlags::default(),
                    monitor_running: AtomicBool::new(false),
                    auto_send_running: AtomicBool::new(false),
                    monitor_task: std::sync::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Write a user's state to disk. Failures are logged — the in-memory
    /// state stays authoritative and the next save retries.
    pub fn persist(&self, user_id: &UserId, data: &UserData) {
        if let Err(e) = save_email_data(&self.users_dir, user_id, &data.to_file()) {
            warn!(user_id = %user_id, error = %e, "email data save failed; keeping in-memory state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailflow_core::types::EmailStatus;

    fn message(id: &str, subject: &str, sender: &str) -> EmailMessage {
        EmailMessage::ingested(id, sender, subject, "body")
    }

    #[test]
    fn activity_ring_is_bounded() {
        let mut data = UserData::default();
        for i in 0..60 {
            data.push_activity(ActivityLevel::Info, "i", format!("a{i}"));
        }
        assert_eq!(data.activities.len(), ACTIVITY_RING);
        assert_eq!(data.activities[0].text, "a59");
    }

    #[test]
    fn history_updates_by_id_then_subject_sender() {
        let mut data = UserData::default();
        let mut m = message("m1", "你好", "a@x.com");
        m.status = EmailStatus::Processed;
        data.record_history(m.clone());
        assert_eq!(data.history.len(), 1);

        // Same id: update in place.
        m.status = EmailStatus::Sent;
        data.record_history(m.clone());
        assert_eq!(data.history.len(), 1);
        assert_eq!(data.history[0].email.status, EmailStatus::Sent);

        // Different id, same (subject, sender): resend update.
        let mut m2 = message("m2", "你好", "a@x.com");
        m2.status = EmailStatus::Sent;
        data.record_history(m2);
        assert_eq!(data.history.len(), 1);
        assert_eq!(data.history[0].email.id, "m2");

        // Genuinely new message: prepended.
        let m3 = message("m3", "另一件事", "b@x.com");
        data.record_history(m3);
        assert_eq!(data.history.len(), 2);
        assert_eq!(data.history[0].email.id, "m3");
    }

    #[tokio::test]
    async fn registry_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UserRegistry::new(dir.path());
        let uid = UserId::new();

        let handle = registry.handle(&uid, &[]);
        {
            let mut data = handle.data.lock().await;
            data.cache.push(message("m1", "s", "a@x.com"));
            data.stats.sent = 3;
            registry.persist(&uid, &data);
        }

        // A fresh registry (new process) reads the same state back.
        let registry2 = UserRegistry::new(dir.path());
        let handle2 = registry2.handle(&uid, &[]);
        let data = handle2.data.lock().await;
        assert_eq!(data.cache.len(), 1);
        assert_eq!(data.stats.sent, 3);
    }

    #[tokio::test]
    async fn handle_is_shared_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UserRegistry::new(dir.path());
        let uid = UserId::new();
        let h1 = registry.handle(&uid, &[]);
        let h2 = registry.handle(&uid, &[]);
        assert!(Arc::ptr_eq(&h1, &h2));
    }
}
