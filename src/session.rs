//! Client session role, set by `RCTRANSSERVER` and consulted by the
//! migration command gates in [`crate::migration`].

use crate::bucket::INIT_ID;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    TransIn,
    TransOut,
    /// The follower/replay role: write-ahead-log and follower consumers
    /// replay the leader's commands under this role, without the
    /// originating session's id, so the "only one transferer per bucket"
    /// ownership check must not apply to them.
    TransSlave,
}

/// Registry of live sessions that currently hold a migration role, keyed by
/// session id. Used by `transbegin`'s single-bucket resumption path to check
/// "no other live client owns it."
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    roles: Mutex<HashMap<u64, Role>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            next_id: AtomicU64::new(INIT_ID + 1),
            roles: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_role(&self, id: u64, role: Role) {
        self.roles.lock().unwrap().insert(id, role);
    }

    pub fn role_of(&self, id: u64) -> Option<Role> {
        self.roles.lock().unwrap().get(&id).copied()
    }

    /// Drops a session's role on disconnect. The core never rolls back
    /// migration state on session loss; this only affects the liveness
    /// check in `transbegin`'s resumption path.
    pub fn forget(&self, id: u64) {
        self.roles.lock().unwrap().remove(&id);
    }

    /// Whether a session with the given id is currently registered holding
    /// a migration role (`TransIn` or `TransOut`).
    pub fn is_live_transferer(&self, id: u64) -> bool {
        matches!(
            self.roles.lock().unwrap().get(&id),
            Some(Role::TransIn) | Some(Role::TransOut)
        )
    }
}

pub struct Session {
    pub id: u64,
    pub role: Role,
    pub db_index: u32,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Session {
            id,
            role: Role::None,
            db_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_skip_init_id() {
        let reg = SessionRegistry::new();
        let a = reg.next_session_id();
        let b = reg.next_session_id();
        assert_ne!(a, b);
        assert_ne!(a, INIT_ID);
        assert_ne!(b, INIT_ID);
    }

    #[test]
    fn is_live_transferer_tracks_role() {
        let reg = SessionRegistry::new();
        let id = reg.next_session_id();
        assert!(!reg.is_live_transferer(id));
        reg.set_role(id, Role::TransOut);
        assert!(reg.is_live_transferer(id));
        reg.set_role(id, Role::TransSlave);
        assert!(!reg.is_live_transferer(id));
    }

    #[test]
    fn forget_drops_role() {
        let reg = SessionRegistry::new();
        let id = reg.next_session_id();
        reg.set_role(id, Role::TransIn);
        assert_eq!(reg.role_of(id), Some(Role::TransIn));
        reg.forget(id);
        assert_eq!(reg.role_of(id), None);
        assert!(!reg.is_live_transferer(id));
    }
}
