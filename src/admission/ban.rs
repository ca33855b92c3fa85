//! Ban records: a coarse block on a client identity that overrides window
//! counting for every resource.

use super::clock::retry_after_secs;

/// A punitive block on one client identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanRecord {
    /// When the ban lifts (epoch ms)
    pub expires_at: i64,
}

impl BanRecord {
    /// Create a ban lasting until `expires_at`.
    pub fn until(expires_at: i64) -> Self {
        Self { expires_at }
    }

    /// A ban is active while `now` is before `expires_at`.
    pub fn is_active(&self, now: i64) -> bool {
        now < self.expires_at
    }

    /// Seconds until the ban lifts.
    pub fn retry_after_secs(&self, now: i64) -> u64 {
        retry_after_secs(self.expires_at, now)
    }
}

/// How a new ban combines with one already stored for the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanMerge {
    /// Replace whatever is stored. Used by operators, who may shorten a ban.
    Overwrite,
    /// Keep whichever expiry is later. Used by automatic escalation so a
    /// concurrent manual ban is never cut short.
    KeepLater,
}

impl BanMerge {
    /// Combine `existing` with `incoming` under this policy.
    pub fn merge(self, existing: BanRecord, incoming: BanRecord) -> BanRecord {
        match self {
            BanMerge::Overwrite => incoming,
            BanMerge::KeepLater if existing.expires_at >= incoming.expires_at => existing,
            BanMerge::KeepLater => incoming,
        }
    }
}
