//! Multi-window send admission control.
//!
//! `admit` checks eligibility without consuming budget; `commit` records a
//! successful send. The split is deliberate: a failed or cancelled send
//! must never count against any window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

/// Minimum gap between two consecutive sends per user.
pub const MIN_SEND_INTERVAL_SECS: u64 = 30;
/// Sends allowed per rolling half hour.
pub const HALF_HOUR_LIMIT: u32 = 10;
/// Sends allowed per rolling hour.
pub const HOUR_LIMIT: u32 = 20;

const HALF_HOUR_SECS: u64 = 1800;
const HOUR_SECS: u64 = 3600;

/// Why a send was denied. Callers branch on this: an `Interval` denial means
/// "try the next message", a quantity denial means "stop the sweep".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialReason {
    Interval,
    HalfHourLimit,
    HourLimit,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        reason: DenialReason,
        /// Seconds (interval) or minutes (quantity limits) until eligible.
        wait: u64,
        /// Client-facing explanation.
        message: String,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug, Clone, Default)]
struct UserWindows {
    last_send: u64,
    count_half_hour: u32,
    reset_half_hour: u64,
    count_hour: u32,
    reset_hour: u64,
}

/// Per-user send budget, one entry per user id behind a single global lock.
/// Critical sections are a handful of integer compares, so one lock for the
/// whole map is fine.
pub struct SendRateLimiter {
    entries: Mutex<HashMap<String, UserWindows>>,
}

impl Default for SendRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SendRateLimiter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `user` may send right now. Never mutates counters.
    pub fn admit(&self, user: &str) -> Admission {
        self.admit_at(user, unix_now())
    }

    /// Record a successful send for `user`.
    pub fn commit(&self, user: &str) {
        self.commit_at(user, unix_now());
    }

    /// Snapshot `(count_half_hour, count_hour, last_send)` for diagnostics.
    pub fn snapshot(&self, user: &str) -> Option<(u32, u32, u64)> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(user)
            .map(|w| (w.count_half_hour, w.count_hour, w.last_send))
    }

    // Clock-injected variants used directly by tests.

    pub fn admit_at(&self, user: &str, now: u64) -> Admission {
        let mut entries = self.entries.lock().unwrap();
        let windows = entries.entry(user.to_string()).or_insert_with(|| UserWindows {
            last_send: 0,
            count_half_hour: 0,
            reset_half_hour: now + HALF_HOUR_SECS,
            count_hour: 0,
            reset_hour: now + HOUR_SECS,
        });

        if now > windows.reset_hour {
            windows.count_hour = 0;
            windows.reset_hour = now + HOUR_SECS;
        }
        if now > windows.reset_half_hour {
            windows.count_half_hour = 0;
            windows.reset_half_hour = now + HALF_HOUR_SECS;
        }

        if windows.count_hour >= HOUR_LIMIT {
            let wait_mins = remaining_minutes(windows.reset_hour, now);
            return Admission::Denied {
                reason: DenialReason::HourLimit,
                wait: wait_mins,
                message: format!("每小时发送量已达上限，请等待 {} 分钟", wait_mins),
            };
        }
        if windows.count_half_hour >= HALF_HOUR_LIMIT {
            let wait_mins = remaining_minutes(windows.reset_half_hour, now);
            return Admission::Denied {
                reason: DenialReason::HalfHourLimit,
                wait: wait_mins,
                message: format!("半小时发送量已达上限，请等待 {} 分钟", wait_mins),
            };
        }
        if windows.last_send > 0 && now.saturating_sub(windows.last_send) < MIN_SEND_INTERVAL_SECS {
            let wait_secs = MIN_SEND_INTERVAL_SECS - (now - windows.last_send);
            return Admission::Denied {
                reason: DenialReason::Interval,
                wait: wait_secs,
                message: format!("发送间隔限制，请等待 {} 秒", wait_secs),
            };
        }

        Admission::Allowed
    }

    pub fn commit_at(&self, user: &str, now: u64) {
        let mut entries = self.entries.lock().unwrap();
        let windows = entries.entry(user.to_string()).or_insert_with(|| UserWindows {
            last_send: 0,
            count_half_hour: 0,
            reset_half_hour: now + HALF_HOUR_SECS,
            count_hour: 0,
            reset_hour: now + HOUR_SECS,
        });
        windows.count_half_hour += 1;
        windows.count_hour += 1;
        windows.last_send = now;
        debug!(
            user,
            half_hour = windows.count_half_hour,
            hour = windows.count_hour,
            "send committed"
        );
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn remaining_minutes(reset_at: u64, now: u64) -> u64 {
    let secs = reset_at.saturating_sub(now);
    secs.div_ceil(60).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    #[test]
    fn first_send_is_allowed_without_mutation() {
        let rl = SendRateLimiter::new();
        assert!(rl.admit_at("u", T0).is_allowed());
        // admit must not consume budget
        assert_eq!(rl.snapshot("u"), Some((0, 0, 0)));
    }

    #[test]
    fn interval_denial_with_remaining_seconds() {
        let rl = SendRateLimiter::new();
        assert!(rl.admit_at("u", T0).is_allowed());
        rl.commit_at("u", T0);

        match rl.admit_at("u", T0 + 15) {
            Admission::Denied {
                reason: DenialReason::Interval,
                wait,
                message,
            } => {
                assert_eq!(wait, 15);
                assert!(message.contains("等待 15 秒"), "message was: {message}");
            }
            other => panic!("expected interval denial, got {other:?}"),
        }
        assert_eq!(rl.snapshot("u"), Some((1, 1, T0)));

        assert!(rl.admit_at("u", T0 + 30).is_allowed());
    }

    #[test]
    fn half_hour_limit_stops_at_ten() {
        let rl = SendRateLimiter::new();
        for i in 0..HALF_HOUR_LIMIT as u64 {
            let t = T0 + i * 60;
            assert!(rl.admit_at("u", t).is_allowed(), "send {i} should pass");
            rl.commit_at("u", t);
        }
        match rl.admit_at("u", T0 + 11 * 60) {
            Admission::Denied {
                reason: DenialReason::HalfHourLimit,
                ..
            } => {}
            other => panic!("expected half-hour denial, got {other:?}"),
        }
    }

    #[test]
    fn hour_limit_stops_at_twenty() {
        let rl = SendRateLimiter::new();
        // 10 sends, wait past the half-hour reset, 10 more.
        for i in 0..10u64 {
            rl.commit_at("u", T0 + i * 60);
        }
        let t1 = T0 + HALF_HOUR_SECS + 60;
        assert!(rl.admit_at("u", t1).is_allowed());
        for i in 0..10u64 {
            rl.commit_at("u", t1 + i * 60);
        }
        match rl.admit_at("u", t1 + 11 * 60) {
            Admission::Denied {
                reason: DenialReason::HourLimit,
                message,
                ..
            } => assert!(message.contains("分钟")),
            other => panic!("expected hour denial, got {other:?}"),
        }
    }

    #[test]
    fn windows_reset_after_expiry() {
        let rl = SendRateLimiter::new();
        for i in 0..10u64 {
            rl.commit_at("u", T0 + i);
        }
        assert!(!rl.admit_at("u", T0 + 60).is_allowed());
        // Past the hour reset both windows reopen.
        let later = T0 + HOUR_SECS + 10;
        assert!(rl.admit_at("u", later).is_allowed());
    }

    #[test]
    fn users_are_independent() {
        let rl = SendRateLimiter::new();
        rl.commit_at("a", T0);
        assert!(rl.admit_at("b", T0 + 1).is_allowed());
    }

    #[test]
    fn failed_send_consumes_nothing() {
        let rl = SendRateLimiter::new();
        // admit twice with no commit in between — both allowed.
        assert!(rl.admit_at("u", T0).is_allowed());
        assert!(rl.admit_at("u", T0 + 1).is_allowed());
        assert_eq!(rl.snapshot("u"), Some((0, 0, 0)));
    }
}
