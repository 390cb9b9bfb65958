//! Authority gating for mutating calls

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the current caller may mutate inventory state
pub trait AuthorityGate: Send + Sync {
    /// Whether mutation is allowed
    fn has_authority(&self) -> bool;
}

/// Fixed authority roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Authoritative server
    Server,
    /// Remote client; every mutation is rejected
    Client,
    /// Client-side scratch copy used for prediction
    LocalSimulation,
}

impl Authority {
    /// Whether this is the real authority
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }
}

impl AuthorityGate for Authority {
    fn has_authority(&self) -> bool {
        !matches!(self, Self::Client)
    }
}

/// Authority flag that can change at runtime (e.g. host migration)
#[derive(Debug, Default)]
pub struct SwitchableAuthority(AtomicBool);

impl SwitchableAuthority {
    /// Create with an initial state
    pub fn new(has_authority: bool) -> Self {
        Self(AtomicBool::new(has_authority))
    }

    /// Change the state
    pub fn set(&self, has_authority: bool) {
        self.0.store(has_authority, Ordering::Release);
    }
}

impl AuthorityGate for SwitchableAuthority {
    fn has_authority(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
