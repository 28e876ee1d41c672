//! The tracked browsing session and its persisted snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Domain, TabId, WindowId};

/// The currently tracked session.
///
/// `start` never changes after creation; it anchors the timeline block
/// written when the session ends. `last_flush` anchors incremental flushes
/// so that already-persisted time is never counted twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub domain: Domain,
    pub start: DateTime<Utc>,
    pub last_flush: DateTime<Utc>,
    pub tab_id: TabId,
    pub window_id: WindowId,
    pub private: bool,
}

impl Session {
    pub fn new(
        domain: Domain,
        tab_id: TabId,
        window_id: WindowId,
        private: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            domain,
            start: now,
            last_flush: now,
            tab_id,
            window_id,
            private,
        }
    }

    pub fn live(&self) -> LiveSession {
        LiveSession {
            domain: self.domain.clone(),
            start: self.start,
        }
    }

    pub fn pending(&self) -> PendingSession {
        PendingSession {
            domain: self.domain.clone(),
            start: self.start,
            last_flush: self.last_flush,
            tab_id: self.tab_id,
            window_id: self.window_id,
            private: self.private,
        }
    }
}

/// The "currently live" indicator consumed by renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSession {
    pub domain: Domain,
    pub start: DateTime<Utc>,
}

/// Durable snapshot of the session, used to recover after the process dies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub domain: Domain,
    pub start: DateTime<Utc>,
    pub last_flush: DateTime<Utc>,
    pub tab_id: TabId,
    pub window_id: WindowId,
    /// Markers written without this flag are assumed private.
    #[serde(default = "assume_private")]
    pub private: bool,
}

const fn assume_private() -> bool {
    true
}

impl From<PendingSession> for Session {
    fn from(pending: PendingSession) -> Self {
        Self {
            domain: pending.domain,
            start: pending.start,
            last_flush: pending.last_flush,
            tab_id: pending.tab_id,
            window_id: pending.window_id,
            private: pending.private,
        }
    }
}
