use mailflow_core::types::{CustomModel, UserId, UserSettings};
use serde::{Deserialize, Serialize};

/// A user may hold at most this many device sessions; older ones are evicted.
pub const MAX_DEVICES: usize = 5;
/// Chat history ring bound.
pub const MAX_CHAT_HISTORY: usize = 50;

/// One logged-in device. Exactly one session per user carries `current: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub token: String,
    pub device_name: String,
    pub created_at: String,
    pub last_active: String,
    #[serde(default)]
    pub current: bool,
}

/// One chat-assistant exchange kept for UI continuity (the assistant
/// endpoint itself lives outside this service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub role: String,
    pub content: String,
    pub time: String,
}

/// Persisted user record. Keyed by username in `user_data.json`; the stable
/// `user_id` inside it names all per-user data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub password_hash: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_auth_code: String,
    #[serde(default)]
    pub devices: Vec<DeviceSession>,
    #[serde(default)]
    pub preferences: serde_json::Value,
    #[serde(default)]
    pub settings: UserSettings,
    #[serde(default)]
    pub custom_models: Vec<CustomModel>,
    #[serde(default)]
    pub chat_history: Vec<ChatRecord>,
    pub register_time: String,
    #[serde(default)]
    pub last_login: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserRecord {
    pub fn new(password_hash: String) -> Self {
        Self {
            user_id: UserId::new(),
            password_hash,
            email: String::new(),
            email_auth_code: String::new(),
            devices: Vec::new(),
            preferences: serde_json::Value::Object(Default::default()),
            settings: UserSettings::default(),
            custom_models: Vec::new(),
            chat_history: Vec::new(),
            register_time: chrono::Utc::now().to_rfc3339(),
            last_login: None,
            avatar: None,
        }
    }

    /// Add or refresh a device session, mark it current, and evict the
    /// oldest sessions past [`MAX_DEVICES`].
    pub fn upsert_device(&mut self, token: &str, device_name: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        for d in &mut self.devices {
            d.current = false;
        }
        if let Some(existing) = self.devices.iter_mut().find(|d| d.token == token) {
            existing.last_active = now;
            existing.current = true;
            return;
        }
        self.devices.push(DeviceSession {
            token: token.to_string(),
            device_name: device_name.to_string(),
            created_at: now.clone(),
            last_active: now,
            current: true,
        });
        if self.devices.len() > MAX_DEVICES {
            // Oldest first by creation time; keep the newest MAX_DEVICES.
            self.devices
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
            self.devices.truncate(MAX_DEVICES);
        }
    }

    /// Drop every session except the one marked current. Used after a
    /// password change so stolen tokens die with the old password.
    pub fn retain_current_device(&mut self) {
        self.devices.retain(|d| d.current);
    }

    pub fn push_chat(&mut self, record: ChatRecord) {
        self.chat_history.push(record);
        if self.chat_history.len() > MAX_CHAT_HISTORY {
            let excess = self.chat_history.len() - MAX_CHAT_HISTORY;
            self.chat_history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_eviction_keeps_five_and_one_current() {
        let mut u = UserRecord::new("hash".into());
        for i in 0..8 {
            u.upsert_device(&format!("tok-{i}"), "laptop");
        }
        assert_eq!(u.devices.len(), MAX_DEVICES);
        assert_eq!(u.devices.iter().filter(|d| d.current).count(), 1);
        assert!(u.devices.iter().any(|d| d.token == "tok-7"));
        assert!(!u.devices.iter().any(|d| d.token == "tok-0"));
    }

    #[test]
    fn upsert_existing_device_refreshes_instead_of_duplicating() {
        let mut u = UserRecord::new("hash".into());
        u.upsert_device("tok-a", "laptop");
        u.upsert_device("tok-b", "phone");
        u.upsert_device("tok-a", "laptop");
        assert_eq!(u.devices.len(), 2);
        let a = u.devices.iter().find(|d| d.token == "tok-a").unwrap();
        assert!(a.current);
    }

    #[test]
    fn chat_history_ring_bound() {
        let mut u = UserRecord::new("hash".into());
        for i in 0..60 {
            u.push_chat(ChatRecord {
                role: "user".into(),
                content: format!("m{i}"),
                time: String::new(),
            });
        }
        assert_eq!(u.chat_history.len(), MAX_CHAT_HISTORY);
        assert_eq!(u.chat_history[0].content, "m10");
    }
}
