//! Storage for window counters and bans.
//!
//! The [`AdmissionStore`] trait is the seam between the decision engine and
//! its bookkeeping. [`InMemoryStore`] keeps everything process-local; a shared
//! networked store can be substituted behind the same trait.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::ban::{BanMerge, BanRecord};
use super::policy::AdmissionPolicy;
use super::window::{WindowHit, WindowKey, WindowRecord};
use crate::error::Result;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    pub windows_removed: usize,
    pub bans_removed: usize,
}

/// Number of entries currently held, live or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreSize {
    pub windows: usize,
    pub bans: usize,
}

/// Trait for admission bookkeeping backends.
///
/// Every method may fail; the engine treats any failure as a reason to let
/// the request through.
pub trait AdmissionStore: Send + Sync {
    /// The ban for `identity` if one is active at `now`.
    fn active_ban(&self, identity: &str, now: i64) -> Result<Option<BanRecord>>;

    /// Store a ban, combining with any existing one per `merge`. Returns the
    /// record that ends up stored.
    fn install_ban(&self, identity: &str, ban: BanRecord, merge: BanMerge) -> Result<BanRecord>;

    /// Remove the ban for `identity`, returning it if one was stored.
    fn remove_ban(&self, identity: &str) -> Result<Option<BanRecord>>;

    /// Record one request against `key`. The read-check-increment must be
    /// atomic with respect to other hits on the same key.
    fn record_hit(&self, key: &WindowKey, now: i64, policy: &AdmissionPolicy) -> Result<WindowHit>;

    /// Read the window for `key` without modifying it.
    fn window(&self, key: &WindowKey) -> Result<Option<WindowRecord>>;

    /// Delete windows with `window_end < now` and bans with `expires_at < now`.
    fn sweep(&self, now: i64) -> Result<SweepStats>;

    /// Current number of stored entries.
    fn size(&self) -> Result<StoreSize>;
}

/// Process-local store built on sharded concurrent maps.
///
/// Each window transition runs while holding the map entry, which serialises
/// concurrent hits on the same key without a global lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    windows: DashMap<WindowKey, WindowRecord>,
    bans: DashMap<String, BanRecord>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdmissionStore for InMemoryStore {
    fn active_ban(&self, identity: &str, now: i64) -> Result<Option<BanRecord>> {
        Ok(self
            .bans
            .get(identity)
            .map(|ban| *ban)
            .filter(|ban| ban.is_active(now)))
    }

    fn install_ban(&self, identity: &str, ban: BanRecord, merge: BanMerge) -> Result<BanRecord> {
        let stored = match self.bans.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                let merged = merge.merge(*entry.get(), ban);
                entry.insert(merged);
                merged
            }
            Entry::Vacant(entry) => {
                entry.insert(ban);
                ban
            }
        };
        Ok(stored)
    }

    fn remove_ban(&self, identity: &str) -> Result<Option<BanRecord>> {
        Ok(self.bans.remove(identity).map(|(_, ban)| ban))
    }

    fn record_hit(&self, key: &WindowKey, now: i64, policy: &AdmissionPolicy) -> Result<WindowHit> {
        let hit = match self.windows.entry(key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().hit(now, policy),
            Entry::Vacant(entry) => {
                let record = WindowRecord::open(now, policy.window_ms);
                entry.insert(record);
                WindowHit::Opened(record)
            }
        };

        trace!(key = %key, count = hit.record().count, "Recorded hit");
        Ok(hit)
    }

    fn window(&self, key: &WindowKey) -> Result<Option<WindowRecord>> {
        Ok(self.windows.get(key).map(|record| *record))
    }

    fn sweep(&self, now: i64) -> Result<SweepStats> {
        let windows_before = self.windows.len();
        self.windows.retain(|_, record| record.window_end >= now);
        let bans_before = self.bans.len();
        self.bans.retain(|_, ban| ban.expires_at >= now);

        Ok(SweepStats {
            windows_removed: windows_before.saturating_sub(self.windows.len()),
            bans_removed: bans_before.saturating_sub(self.bans.len()),
        })
    }

    fn size(&self) -> Result<StoreSize> {
        Ok(StoreSize {
            windows: self.windows.len(),
            bans: self.bans.len(),
        })
    }
}
