use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Per-user cooperative stop flags.
///
/// Pipelines poll these at fixed checkpoints; nothing is interrupted
/// synchronously. Flags are also cleared by a deferred timer
/// ([`crate::engine::Engine::spawn_deferred_clear`]) so a stop request can
/// never wedge future processing if the in-flight pipeline died before
/// reaching a checkpoint.
#[derive(Debug, Default)]
pub struct StopFlags {
    stop_all: AtomicBool,
    stopped_ids: Mutex<HashSet<String>>,
    /// Bumped on every stop request. A deferred clearer only fires when the
    /// epoch it captured is still current, so an old timer cannot wipe a
    /// newer stop request.
    epoch: AtomicU64,
}

impl StopFlags {
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn request_stop_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_all.store(true, Ordering::SeqCst);
    }

    pub fn stop_all_requested(&self) -> bool {
        self.stop_all.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self, email_id: &str) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stopped_ids.lock().unwrap().insert(email_id.to_string());
    }

    /// True when either the global flag or this message's individual flag
    /// is set. This is the single check every checkpoint performs.
    pub fn is_stop_requested(&self, email_id: &str) -> bool {
        self.stop_all_requested() || self.stopped_ids.lock().unwrap().contains(email_id)
    }

    /// Remove one message from the stop set (done when its checkpoint
    /// honours the stop).
    pub fn acknowledge(&self, email_id: &str) {
        self.stopped_ids.lock().unwrap().remove(email_id);
    }

    pub fn clear_stop_all(&self) {
        self.stop_all.store(false, Ordering::SeqCst);
    }

    /// Reset everything (deferred clear, and before each monitor sweep).
    pub fn clear_all(&self) {
        self.stop_all.store(false, Ordering::SeqCst);
        self.stopped_ids.lock().unwrap().clear();
    }

    /// Reset everything iff no newer stop request arrived since `epoch` was
    /// captured. Used by the deferred clearer.
    pub fn clear_all_if_epoch(&self, epoch: u64) -> bool {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        self.clear_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn individual_and_global_flags_both_trigger() {
        let flags = StopFlags::default();
        assert!(!flags.is_stop_requested("m1"));

        flags.request_stop("m1");
        assert!(flags.is_stop_requested("m1"));
        assert!(!flags.is_stop_requested("m2"));

        flags.request_stop_all();
        assert!(flags.is_stop_requested("m2"));
    }

    #[test]
    fn acknowledge_removes_only_that_id() {
        let flags = StopFlags::default();
        flags.request_stop("m1");
        flags.request_stop("m2");
        flags.acknowledge("m1");
        assert!(!flags.is_stop_requested("m1"));
        assert!(flags.is_stop_requested("m2"));
    }

    #[test]
    fn clear_all_resets_both_kinds() {
        let flags = StopFlags::default();
        flags.request_stop("m1");
        flags.request_stop_all();
        flags.clear_all();
        assert!(!flags.is_stop_requested("m1"));
        assert!(!flags.stop_all_requested());
    }

    #[test]
    fn stale_epoch_does_not_clear_newer_request() {
        let flags = StopFlags::default();
        flags.request_stop("m1");
        let stale = flags.epoch();

        // A newer stop request bumps the epoch; the old timer must not
        // wipe it.
        flags.request_stop("m2");
        assert!(!flags.clear_all_if_epoch(stale));
        assert!(flags.is_stop_requested("m2"));

        // The timer belonging to the newest request clears everything.
        assert!(flags.clear_all_if_epoch(flags.epoch()));
        assert!(!flags.is_stop_requested("m2"));
    }
}
