//! Authentication context
//!
//! Token handling lives elsewhere; the pipeline only asks whether a user
//! session is active before it starts the feed.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait AuthContext: Send + Sync {
    fn is_session_active(&self) -> bool;
}

/// Signed-in flag that can be flipped from anywhere
#[derive(Debug, Default)]
pub struct SessionFlag {
    active: AtomicBool,
}

impl SessionFlag {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn sign_in(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn sign_out(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl AuthContext for SessionFlag {
    fn is_session_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
