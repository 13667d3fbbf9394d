use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Rendezvous point between the command channel and the training loop.
/// Both sides read and write through coarse lock-and-copy accessors; a
/// stop landing just after a check is picked up one hook interval later.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlFlags {
    pub active: bool,
    pub stop: bool,
    pub config_id: Option<i64>,
}

#[derive(Clone)]
pub struct SharedFlags(Arc<Mutex<ControlFlags>>);

impl SharedFlags {
    pub fn new() -> SharedFlags {
        SharedFlags(Arc::new(Mutex::new(ControlFlags::default())))
    }

    pub fn request_start(&self, config_id: i64) {
        let mut flags = self.0.lock().unwrap();
        flags.active = true;
        flags.stop = false;
        flags.config_id = Some(config_id);
    }

    pub fn request_stop(&self) {
        self.0.lock().unwrap().stop = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.0.lock().unwrap().stop
    }

    /// Takes the pending config id, clearing it so a concurrent observer
    /// cannot claim the same session twice.
    pub fn claim_config(&self) -> Option<i64> {
        self.0.lock().unwrap().config_id.take()
    }

    pub fn set_active(&self, active: bool) {
        self.0.lock().unwrap().active = active;
    }

    pub fn clear_session(&self) {
        let mut flags = self.0.lock().unwrap();
        flags.active = false;
        flags.stop = false;
    }

    pub fn snapshot(&self) -> ControlFlags {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_sets_flags_and_clears_stop() {
        let flags = SharedFlags::new();
        flags.request_stop();
        flags.request_start(7);
        let snap = flags.snapshot();
        assert!(snap.active);
        assert!(!snap.stop);
        assert_eq!(snap.config_id, Some(7));
    }

    #[test]
    fn claim_config_is_single_shot() {
        let flags = SharedFlags::new();
        flags.request_start(5);
        assert_eq!(flags.claim_config(), Some(5));
        assert_eq!(flags.claim_config(), None);
    }

    #[test]
    fn clear_session_resets_active_and_stop() {
        let flags = SharedFlags::new();
        flags.request_start(1);
        flags.request_stop();
        flags.clear_session();
        let snap = flags.snapshot();
        assert!(!snap.active);
        assert!(!snap.stop);
    }

    #[test]
    fn clones_share_state() {
        let flags = SharedFlags::new();
        let other = flags.clone();
        other.request_stop();
        assert!(flags.stop_requested());
    }
}
