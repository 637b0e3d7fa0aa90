use std::fs;
use std::path::{Path, PathBuf};

use mailflow_core::types::{Activity, EmailMessage, HistoryRecord, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Counters persisted alongside the cache. Stats served to clients are
/// recomputed from cache + history; these only bridge the gap for sends
/// that have not been flushed yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatCounters {
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub failed: u64,
}

/// On-disk shape of `user_email_data_{user_id}.json`.
///
/// The cache, history, activity ring and counters are one file on purpose:
/// a single atomic-ish rewrite keeps them mutually consistent, and the files
/// stay small (last-writer-wins is the documented contract).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailDataFile {
    #[serde(default)]
    pub emails_cache: Vec<EmailMessage>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub stats: StatCounters,
    #[serde(default)]
    pub last_check_time: Option<String>,
    #[serde(default)]
    pub auto_process: bool,
    #[serde(default)]
    pub check_interval: Option<u64>,
}

/// Path of the id-keyed data file. The id never changes, so renames never
/// touch this file.
pub fn email_data_path(users_dir: &Path, user_id: &UserId) -> PathBuf {
    users_dir.join(format!("user_email_data_{}.json", user_id))
}

fn legacy_email_data_path(users_dir: &Path, username: &str) -> PathBuf {
    users_dir.join(format!("user_email_data_{}.json", username))
}

/// Load a user's email data.
///
/// Prefers the id-keyed file; otherwise migrates the first legacy
/// username-keyed file found (copy to the new path, delete the old one).
/// A missing file yields empty state; a malformed file is treated the same
/// after a warning, since the cache is reconstructible from the mailbox.
pub fn load_email_data(
    users_dir: &Path,
    user_id: &UserId,
    legacy_usernames: &[&str],
) -> EmailDataFile {
    let path = email_data_path(users_dir, user_id);
    if path.exists() {
        return read_data_file(&path);
    }

    for name in legacy_usernames {
        let legacy = legacy_email_data_path(users_dir, name);
        if legacy.exists() {
            info!(user_id = %user_id, from = %legacy.display(), "migrating legacy email data file");
            match fs::copy(&legacy, &path) {
                Ok(_) => {
                    if let Err(e) = fs::remove_file(&legacy) {
                        warn!(error = %e, "failed to remove legacy data file after migration");
                    }
                    return read_data_file(&path);
                }
                Err(e) => {
                    warn!(error = %e, "legacy data file migration failed; reading in place");
                    return read_data_file(&legacy);
                }
            }
        }
    }

    EmailDataFile::default()
}

/// Full-file rewrite. Callers hold the user lock; the write itself goes
/// through a temp file + rename so readers never observe a torn file.
pub fn save_email_data(users_dir: &Path, user_id: &UserId, data: &EmailDataFile) -> Result<()> {
    fs::create_dir_all(users_dir)?;
    let path = email_data_path(users_dir, user_id);
    let bytes = serde_json::to_vec_pretty(data)?;
    write_atomic(&path, &bytes)
}

/// Write `bytes` to `path` via a sibling temp file and an atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_data_file(path: &Path) -> EmailDataFile {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed email data file; starting empty");
                EmailDataFile::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable email data file; starting empty");
            EmailDataFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailflow_core::types::EmailStatus;

    fn sample_message(id: &str) -> EmailMessage {
        let mut m = EmailMessage::ingested(id, "c@example.com", "你好", "请问价格");
        m.status = EmailStatus::Pending;
        m
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let uid = UserId::new();
        let mut data = EmailDataFile::default();
        data.emails_cache.push(sample_message("m1"));
        data.stats.sent = 2;
        data.last_check_time = Some("2026-08-01T00:00:00Z".into());

        save_email_data(dir.path(), &uid, &data).unwrap();
        let loaded = load_email_data(dir.path(), &uid, &[]);
        assert_eq!(loaded.emails_cache.len(), 1);
        assert_eq!(loaded.emails_cache[0].id, "m1");
        assert_eq!(loaded.stats.sent, 2);
        assert_eq!(loaded.last_check_time.as_deref(), Some("2026-08-01T00:00:00Z"));
        // No stray temp file left behind.
        assert!(!email_data_path(dir.path(), &uid)
            .with_extension("json.tmp")
            .exists());
    }

    #[test]
    fn missing_file_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_email_data(dir.path(), &UserId::new(), &["nobody"]);
        assert!(loaded.emails_cache.is_empty());
        assert!(loaded.history.is_empty());
    }

    #[test]
    fn legacy_file_is_migrated_to_id_keyed_path() {
        let dir = tempfile::tempdir().unwrap();
        let uid = UserId::new();
        let mut data = EmailDataFile::default();
        data.emails_cache.push(sample_message("legacy-1"));
        let legacy = dir.path().join("user_email_data_alice.json");
        fs::write(&legacy, serde_json::to_vec(&data).unwrap()).unwrap();

        let loaded = load_email_data(dir.path(), &uid, &["alice"]);
        assert_eq!(loaded.emails_cache[0].id, "legacy-1");
        assert!(email_data_path(dir.path(), &uid).exists());
        assert!(!legacy.exists());
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let uid = UserId::new();
        fs::write(email_data_path(dir.path(), &uid), b"{not json").unwrap();
        let loaded = load_email_data(dir.path(), &uid, &[]);
        assert!(loaded.emails_cache.is_empty());
    }
}
