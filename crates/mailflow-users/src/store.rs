use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use mailflow_core::types::{CustomModel, UserId, UserSettings};
use tracing::{info, warn};
use uuid::Uuid;

use crate::email_data::write_atomic;
use crate::error::{Result, UserError};
use crate::mapping::UsernameMap;
use crate::types::UserRecord;

const USER_DATA_FILE: &str = "user_data.json";
const MAPPING_FILE: &str = "username_mapping.json";
const ADMIN_USERNAME: &str = "admin";

/// Store of user records and the username rename map.
///
/// Both files live under the users directory and are written atomically
/// (temp + rename). All mutation goes through one `Mutex` — the record set
/// is small and every critical section is an in-memory update plus one
/// serialize-and-rename.
pub struct UserStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    users: HashMap<String, UserRecord>,
    mapping: UsernameMap,
}

impl UserStore {
    /// Load (or seed) the store. A missing or unreadable `user_data.json`
    /// yields a single admin user; individually malformed records are
    /// repaired in place and persisted back.
    pub fn open(users_dir: &Path, admin_password: &str) -> Result<Self> {
        fs::create_dir_all(users_dir)?;
        let (users, repaired) = load_users(&users_dir.join(USER_DATA_FILE), admin_password)?;
        let mapping = load_mapping(&users_dir.join(MAPPING_FILE));

        let store = Self {
            dir: users_dir.to_path_buf(),
            inner: Mutex::new(Inner { users, mapping }),
        };
        if repaired {
            store.persist_users()?;
        }
        Ok(store)
    }

    // ── resolution ───────────────────────────────────────────────────────

    /// Follow the rename chain until a live username (or the original) is
    /// found.
    pub fn resolve(&self, username: &str) -> String {
        let inner = self.inner.lock().unwrap();
        inner.mapping.resolve(username)
    }

    pub fn get(&self, username: &str) -> Option<UserRecord> {
        let inner = self.inner.lock().unwrap();
        inner.users.get(username).cloned()
    }

    pub fn get_by_id(&self, user_id: &UserId) -> Option<(String, UserRecord)> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|(_, u)| &u.user_id == user_id)
            .map(|(name, u)| (name.clone(), u.clone()))
    }

    pub fn list_usernames(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.users.keys().cloned().collect()
    }

    /// Historical aliases of a live username (keys whose chain ends here).
    /// Used to find legacy username-keyed data files during migration.
    pub fn aliases_of(&self, username: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .mapping
            .entries()
            .keys()
            .filter(|old| inner.mapping.resolve(old) == username)
            .cloned()
            .collect()
    }

    // ── account lifecycle ────────────────────────────────────────────────

    /// Create a new account. Names that are live *or* appear as a mapping
    /// key are rejected — re-registering a renamed-away handle would let a
    /// stranger inherit resolution of the old name.
    pub fn register(&self, username: &str, password: &str) -> Result<UserRecord> {
        if username.trim().is_empty() {
            return Err(UserError::AuthFailed("用户名不能为空".to_string()));
        }
        let hash = hash_password(password)?;
        let record = {
            let mut inner = self.inner.lock().unwrap();
            if inner.users.contains_key(username) || inner.mapping.is_stale(username) {
                return Err(UserError::UsernameTaken(username.to_string()));
            }
            let record = UserRecord::new(hash);
            inner.users.insert(username.to_string(), record.clone());
            record
        };
        self.persist_users()?;
        info!(username, user_id = %record.user_id, "user registered");
        Ok(record)
    }

    /// Verify credentials and open a device session. Logging in with a
    /// renamed-away username fails with a pointer to the new handle.
    pub fn login(&self, username: &str, password: &str, device_name: &str) -> Result<(String, UserRecord)> {
        let token = Uuid::new_v4().to_string();
        let record = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.users.contains_key(username) {
                let live = inner.mapping.resolve(username);
                if live != username && inner.users.contains_key(&live) {
                    return Err(UserError::AuthFailed(format!(
                        "用户名已更改，请使用新用户名 '{}' 登录",
                        live
                    )));
                }
                return Err(UserError::NotFound(username.to_string()));
            }
            let user = inner.users.get_mut(username).unwrap();
            if !verify_password(password, &user.password_hash) {
                return Err(UserError::AuthFailed("用户名或密码错误".to_string()));
            }
            user.last_login = Some(chrono::Utc::now().to_rfc3339());
            user.upsert_device(&token, device_name);
            user.clone()
        };
        self.persist_users()?;
        Ok((token, record))
    }

    /// Find the owner of a device token.
    pub fn authenticate(&self, token: &str) -> Option<(String, UserRecord)> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|(_, u)| u.devices.iter().any(|d| d.token == token))
            .map(|(name, u)| (name.clone(), u.clone()))
    }

    pub fn change_password(&self, username: &str, old: &str, new: &str) -> Result<()> {
        let hash = hash_password(new)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let user = inner
                .users
                .get_mut(username)
                .ok_or_else(|| UserError::NotFound(username.to_string()))?;
            if !verify_password(old, &user.password_hash) {
                return Err(UserError::AuthFailed("原密码错误".to_string()));
            }
            user.password_hash = hash;
            user.retain_current_device();
        }
        self.persist_users()
    }

    /// Admin-initiated reset: no old-password check, all sessions dropped.
    pub fn reset_password(&self, username: &str, new: &str) -> Result<()> {
        let hash = hash_password(new)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let user = inner
                .users
                .get_mut(username)
                .ok_or_else(|| UserError::NotFound(username.to_string()))?;
            user.password_hash = hash;
            user.devices.clear();
        }
        self.persist_users()
    }

    /// Rename a user. The record moves to the new key (same `user_id`, so
    /// data files stay put) and an `old -> new` mapping entry is appended.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(UserError::AuthFailed("用户名不能为空".to_string()));
        }
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.users.contains_key(old) {
                return Err(UserError::NotFound(old.to_string()));
            }
            if inner.users.contains_key(new) || inner.mapping.is_stale(new) {
                return Err(UserError::UsernameTaken(new.to_string()));
            }
            inner.mapping.insert(old, new)?;
            let record = inner.users.remove(old).unwrap();
            inner.users.insert(new.to_string(), record);
        }
        self.persist_users()?;
        self.persist_mapping()?;
        info!(old, new, "user renamed");
        Ok(())
    }

    // ── record updates ───────────────────────────────────────────────────

    pub fn update_settings(&self, username: &str, settings: UserSettings) -> Result<UserSettings> {
        let normalized = {
            let mut inner = self.inner.lock().unwrap();
            let user = inner
                .users
                .get_mut(username)
                .ok_or_else(|| UserError::NotFound(username.to_string()))?;
            let mut s = settings;
            s.batch_size = s.batch_size_clamped();
            s.single_concurrency = s.single_concurrency_clamped();
            if s.check_interval_mins == 0 {
                s.check_interval_mins = 1;
            }
            user.settings = s.clone();
            s
        };
        self.persist_users()?;
        Ok(normalized)
    }

    pub fn set_custom_models(&self, username: &str, models: Vec<CustomModel>) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let user = inner
                .users
                .get_mut(username)
                .ok_or_else(|| UserError::NotFound(username.to_string()))?;
            user.custom_models = models;
        }
        self.persist_users()
    }

    pub fn set_mailbox(&self, username: &str, email: &str, auth_code: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let user = inner
                .users
                .get_mut(username)
                .ok_or_else(|| UserError::NotFound(username.to_string()))?;
            user.email = email.to_string();
            user.email_auth_code = auth_code.to_string();
        }
        self.persist_users()
    }

    // ── persistence ──────────────────────────────────────────────────────

    fn persist_users(&self) -> Result<()> {
        let bytes = {
            let inner = self.inner.lock().unwrap();
            serde_json::to_vec_pretty(&inner.users)?
        };
        write_atomic(&self.dir.join(USER_DATA_FILE), &bytes)
    }

    fn persist_mapping(&self) -> Result<()> {
        let bytes = {
            let inner = self.inner.lock().unwrap();
            serde_json::to_vec_pretty(inner.mapping.entries())?
        };
        write_atomic(&self.dir.join(MAPPING_FILE), &bytes)
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| UserError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Load user_data.json. Returns the map plus whether any repair happened
/// (missing file, whole-file corruption, or per-record corruption).
fn load_users(path: &Path, admin_password: &str) -> Result<(HashMap<String, UserRecord>, bool)> {
    let seeded = |reason: &str| -> Result<(HashMap<String, UserRecord>, bool)> {
        warn!(path = %path.display(), reason, "seeding default admin user");
        let mut users = HashMap::new();
        users.insert(
            ADMIN_USERNAME.to_string(),
            UserRecord::new(hash_password(admin_password)?),
        );
        Ok((users, true))
    };

    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(_) => return seeded("file missing"),
    };
    let raw: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return seeded("file malformed"),
    };
    let Some(obj) = raw.as_object() else {
        return seeded("top level not an object");
    };

    let mut users = HashMap::new();
    let mut repaired = false;
    for (name, value) in obj {
        match serde_json::from_value::<UserRecord>(value.clone()) {
            Ok(record) => {
                users.insert(name.clone(), record);
            }
            Err(e) => {
                // Keep the account alive: preserve the user_id if readable,
                // default everything else, force a credential reset.
                warn!(username = %name, error = %e, "repairing malformed user record");
                let mut record = UserRecord::new(hash_password(admin_password)?);
                if let Some(id) = value.get("user_id").and_then(|v| v.as_str()) {
                    record.user_id = UserId::from(id);
                }
                users.insert(name.clone(), record);
                repaired = true;
            }
        }
    }
    if users.is_empty() {
        return seeded("no usable records");
    }
    Ok((users, repaired))
}

fn load_mapping(path: &Path) -> UsernameMap {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
            Ok(entries) => UsernameMap::from_entries(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed mapping file; starting empty");
                UsernameMap::default()
            }
        },
        Err(_) => UsernameMap::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> UserStore {
        UserStore::open(dir, "admin123").unwrap()
    }

    #[test]
    fn open_seeds_admin_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.get(ADMIN_USERNAME).is_some());
        assert!(dir.path().join(USER_DATA_FILE).exists());

        // Reopen reads the same admin (same user_id), no reseed.
        let id1 = store.get(ADMIN_USERNAME).unwrap().user_id;
        let store2 = open_store(dir.path());
        assert_eq!(store2.get(ADMIN_USERNAME).unwrap().user_id, id1);
    }

    #[test]
    fn register_login_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.register("alice", "secret").unwrap();
        let (token, user) = store.login("alice", "secret", "laptop").unwrap();
        assert!(!token.is_empty());
        assert_eq!(user.devices.len(), 1);
        assert!(store.login("alice", "wrong", "laptop").is_err());

        let (name, _) = store.authenticate(&token).unwrap();
        assert_eq!(name, "alice");
    }

    #[test]
    fn rename_preserves_user_id_and_redirects_login() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let u1 = store.register("u1", "pw").unwrap();

        // Seed message data under the stable id before the rename.
        let mut email_data = crate::email_data::EmailDataFile::default();
        for i in 0..3 {
            email_data.emails_cache.push(
                mailflow_core::types::EmailMessage::ingested(
                    format!("m{i}"),
                    "c@x.com",
                    "s",
                    "b",
                ),
            );
        }
        crate::email_data::save_email_data(dir.path(), &u1.user_id, &email_data).unwrap();
        let data_path = crate::email_data::email_data_path(dir.path(), &u1.user_id);
        let bytes_before = fs::read(&data_path).unwrap();

        store.rename("u1", "u2").unwrap();

        assert_eq!(store.resolve("u1"), "u2");
        assert_eq!(store.get("u2").unwrap().user_id, u1.user_id);
        assert!(store.get("u1").is_none());

        // The mapping file records the rename; the data file is untouched.
        let mapping: std::collections::HashMap<String, String> = serde_json::from_slice(
            &fs::read(dir.path().join("username_mapping.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(mapping.get("u1"), Some(&"u2".to_string()));
        assert_eq!(fs::read(&data_path).unwrap(), bytes_before);
        let reloaded = crate::email_data::load_email_data(dir.path(), &u1.user_id, &["u2", "u1"]);
        assert_eq!(reloaded.emails_cache.len(), 3);

        let err = store.login("u1", "pw", "laptop").unwrap_err();
        assert_eq!(
            err.to_string(),
            "用户名已更改，请使用新用户名 'u2' 登录"
        );
        assert!(store.login("u2", "pw", "laptop").is_ok());
    }

    #[test]
    fn stale_usernames_cannot_be_reregistered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.register("old", "pw").unwrap();
        store.rename("old", "new").unwrap();
        assert!(matches!(
            store.register("old", "pw"),
            Err(UserError::UsernameTaken(_))
        ));
    }

    #[test]
    fn aliases_follow_multi_hop_chains() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.register("a", "pw").unwrap();
        store.rename("a", "b").unwrap();
        store.rename("b", "c").unwrap();
        let mut aliases = store.aliases_of("c");
        aliases.sort();
        assert_eq!(aliases, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn malformed_record_is_repaired_keeping_user_id() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.register("bob", "pw").unwrap();
        }
        // Corrupt bob's record but keep the id readable.
        let path = dir.path().join(USER_DATA_FILE);
        let mut raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let id = raw["bob"]["user_id"].clone();
        raw["bob"] = serde_json::json!({"user_id": id, "password_hash": 42});
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let store = open_store(dir.path());
        let bob = store.get("bob").unwrap();
        assert_eq!(serde_json::json!(bob.user_id.as_str()), id);
        // Old password no longer works after repair (credential reset).
        assert!(store.login("bob", "pw", "laptop").is_err());
    }

    #[test]
    fn settings_update_normalizes_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.register("carol", "pw").unwrap();
        let mut s = UserSettings::default();
        s.batch_size = 0;
        s.single_concurrency = 99;
        s.check_interval_mins = 0;
        let s = store.update_settings("carol", s).unwrap();
        assert_eq!(s.batch_size, 1);
        assert_eq!(s.single_concurrency, 20);
        assert_eq!(s.check_interval_mins, 1);
    }
}
