//! User-controlled tracking settings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::clock::DEFAULT_GRANULARITY_MS;
use crate::types::Domain;

/// Tracking settings, read fresh on every persistence operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Domains that are never tracked.
    pub excluded: BTreeSet<Domain>,
    /// Granularity persisted increments are rounded down to.
    pub granularity_ms: i64,
    /// Whether time spent in private windows is recorded.
    pub retain_private: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            excluded: BTreeSet::new(),
            granularity_ms: DEFAULT_GRANULARITY_MS,
            retain_private: false,
        }
    }
}

impl Settings {
    pub fn is_excluded(&self, domain: &Domain) -> bool {
        self.excluded.contains(domain)
    }

    /// Whether time for `domain` may be accumulated at all.
    pub fn is_trackable(&self, domain: Option<&Domain>) -> bool {
        domain.is_some_and(|d| !self.is_excluded(d))
    }

    /// Whether a session with the given privacy flag may be persisted.
    pub const fn allows_private(&self, private: bool) -> bool {
        !private || self.retain_private
    }
}
