//! Fixed-window counters keyed by client identity and resource.

use super::clock::{deadline, retry_after_secs};
use super::policy::AdmissionPolicy;

/// A key that uniquely identifies one window counter.
///
/// Identity and resource are kept apart rather than concatenated so that
/// `("1.2.3.4", "/x")` can never collide with `("1.2.3.4/", "x")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The resolved client identity
    pub identity: String,
    /// The protected resource
    pub resource: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(identity: &str, resource: &str) -> Self {
        Self {
            identity: identity.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.identity, self.resource)
    }
}

/// Quota consumption for one key within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Requests observed since `first_request`
    pub count: u64,
    /// When this window's quota resets (epoch ms)
    pub window_end: i64,
    /// When the request that opened this window arrived (epoch ms)
    pub first_request: i64,
}

/// Outcome of recording one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowHit {
    /// No live window existed; a fresh one was opened with a count of one.
    Opened(WindowRecord),
    /// The request fit within the quota.
    Counted(WindowRecord),
    /// The quota was already used up.
    Exceeded {
        record: WindowRecord,
        /// Requests seen beyond the quota in this window, this one included
        violations: u64,
    },
}

impl WindowHit {
    /// The window state after the hit was recorded.
    pub fn record(&self) -> WindowRecord {
        match *self {
            WindowHit::Opened(record) | WindowHit::Counted(record) => record,
            WindowHit::Exceeded { record, .. } => record,
        }
    }

    /// Whether the request was within quota.
    #[cfg(test)]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, WindowHit::Exceeded { .. })
    }
}

impl WindowRecord {
    /// Open a new window at `now`.
    pub fn open(now: i64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_end: deadline(now, window_ms),
            first_request: now,
        }
    }

    /// A window is live until `now` reaches `window_end`.
    pub fn is_live(&self, now: i64) -> bool {
        now < self.window_end
    }

    /// Requests still admissible in this window.
    pub fn remaining(&self, max_requests: u64) -> u64 {
        max_requests.saturating_sub(self.count)
    }

    /// Seconds until this window resets.
    pub fn retry_after_secs(&self, now: i64) -> u64 {
        retry_after_secs(self.window_end, now)
    }

    /// Record one request at `now`.
    ///
    /// An expired window is replaced by a fresh one. Within a live window the
    /// count grows on every request, rejected ones included, so excess
    /// requests accumulate toward the ban threshold.
    pub fn hit(&mut self, now: i64, policy: &AdmissionPolicy) -> WindowHit {
        if !self.is_live(now) {
            *self = Self::open(now, policy.window_ms);
            return WindowHit::Opened(*self);
        }

        self.count = self.count.saturating_add(1);
        if self.count <= policy.max_requests {
            WindowHit::Counted(*self)
        } else {
            WindowHit::Exceeded {
                record: *self,
                violations: self.count - policy.max_requests,
            }
        }
    }
}
