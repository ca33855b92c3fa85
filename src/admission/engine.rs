//! Core admission engine.
//!
//! Each check consults the ban store, then the window counter for the
//! (identity, resource) pair, and escalates repeat offenders into a ban.
//! Bookkeeping failures never reject a request: the engine reports them and
//! lets the request through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ban::{BanMerge, BanRecord};
use super::clock::{deadline, now_ms, to_datetime};
use super::decision::Decision;
use super::janitor::Janitor;
use super::policy::{AdmissionPolicy, PolicyTable};
use super::store::{AdmissionStore, InMemoryStore, StoreSize, SweepStats};
use super::window::{WindowHit, WindowKey};
use crate::error::Result;
use crate::report::{ErrorReporter, FailureContext, TracingReporter};

/// Read-only snapshot of an identity's standing on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionStatus {
    pub identity: String,
    pub resource: String,
    /// Requests allowed per window
    pub limit: u64,
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// When the current window resets, if one is live
    pub reset_at: Option<DateTime<Utc>>,
    /// Whether the quota is used up, i.e. the next request in this window
    /// would be rejected. True both at and over the limit.
    pub limited: bool,
    /// When the identity's ban lifts, if one is active
    pub banned_until: Option<DateTime<Utc>>,
}

/// The admission engine that owns the window and ban stores.
///
/// This struct is thread-safe and is meant to be shared behind an `Arc`.
pub struct AdmissionEngine {
    store: Box<dyn AdmissionStore>,
    policies: RwLock<PolicyTable>,
    janitor: Janitor,
    reporter: Arc<dyn ErrorReporter>,
}

/// Builder for [`AdmissionEngine`].
pub struct AdmissionEngineBuilder {
    store: Option<Box<dyn AdmissionStore>>,
    policies: PolicyTable,
    janitor: Janitor,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl AdmissionEngineBuilder {
    /// Use a custom bookkeeping backend instead of the in-memory store.
    pub fn store(mut self, store: impl AdmissionStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Set the policy table.
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Set the fraction of checks that trigger an expiry sweep.
    pub fn sweep_probability(mut self, probability: f64) -> Self {
        self.janitor = Janitor::new(probability);
        self
    }

    /// Set the collaborator that receives recovered failures.
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> AdmissionEngine {
        AdmissionEngine {
            store: self.store.unwrap_or_else(|| Box::new(InMemoryStore::new())),
            policies: RwLock::new(self.policies),
            janitor: self.janitor,
            reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
        }
    }
}

impl AdmissionEngine {
    /// Create an engine with the default policy and an in-memory store.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create an engine with the given policy table.
    pub fn with_policies(policies: PolicyTable) -> Self {
        Self::builder().policies(policies).build()
    }

    /// Start building an engine with custom parts.
    pub fn builder() -> AdmissionEngineBuilder {
        AdmissionEngineBuilder {
            store: None,
            policies: PolicyTable::default(),
            janitor: Janitor::default(),
            reporter: None,
        }
    }

    /// Replace the policy table.
    pub fn set_policies(&self, policies: PolicyTable) {
        *self.policies.write() = policies;
    }

    /// Get the current policy table.
    pub fn policies(&self) -> PolicyTable {
        self.policies.read().clone()
    }

    /// The effective policy for a resource.
    pub fn policy_for(&self, resource: &str) -> AdmissionPolicy {
        self.policies.read().find_policy(resource)
    }

    /// Check whether a request from `identity` to `resource` may proceed,
    /// using the configured policy for the resource.
    pub fn check_admission(&self, identity: &str, resource: &str) -> Decision {
        let policy = self.policy_for(resource);
        self.check_admission_at(identity, resource, &policy, now_ms())
    }

    /// Check admission at an explicit time with an explicit policy.
    ///
    /// Allowed requests always consume quota. Store failures are reported
    /// and answered with [`Decision::Allow`].
    pub fn check_admission_at(
        &self,
        identity: &str,
        resource: &str,
        policy: &AdmissionPolicy,
        now: i64,
    ) -> Decision {
        let decision = match self.evaluate(identity, resource, policy, now) {
            Ok(decision) => decision,
            Err(e) => {
                self.reporter.report(
                    &e,
                    &FailureContext {
                        operation: "check_admission",
                        identity: Some(identity),
                        resource: Some(resource),
                    },
                );
                Decision::Allow
            }
        };

        // A check reports at most one failure; sweep errors here are only logged.
        if let Err(e) = self.janitor.maybe_sweep(self.store.as_ref(), now) {
            warn!(error = %e, "Expiry sweep failed during admission check");
        }

        decision
    }

    fn evaluate(
        &self,
        identity: &str,
        resource: &str,
        policy: &AdmissionPolicy,
        now: i64,
    ) -> Result<Decision> {
        if let Some(ban) = self.store.active_ban(identity, now)? {
            debug!(identity = %identity, resource = %resource, "Rejecting banned client");
            return Ok(Decision::banned(ban.retry_after_secs(now)));
        }

        let key = WindowKey::new(identity, resource);
        match self.store.record_hit(&key, now, policy)? {
            WindowHit::Opened(_) | WindowHit::Counted(_) => Ok(Decision::Allow),
            WindowHit::Exceeded { record, violations } => {
                warn!(
                    identity = %identity,
                    resource = %resource,
                    count = record.count,
                    limit = policy.max_requests,
                    violations = violations,
                    "Rate limit exceeded"
                );

                // The ban applies from the next request on; this one is
                // answered as a plain quota rejection.
                if violations >= policy.ban_threshold {
                    self.escalate(identity, violations, policy, now)?;
                }

                Ok(Decision::rate_limited(record.retry_after_secs(now)))
            }
        }
    }

    fn escalate(
        &self,
        identity: &str,
        violations: u64,
        policy: &AdmissionPolicy,
        now: i64,
    ) -> Result<BanRecord> {
        let ban = BanRecord::until(deadline(now, policy.ban_duration_ms));
        let stored = self.store.install_ban(identity, ban, BanMerge::KeepLater)?;

        warn!(
            identity = %identity,
            violations = violations,
            banned_until = ?to_datetime(stored.expires_at),
            "Client banned after repeated violations"
        );
        Ok(stored)
    }

    /// Ban `identity` for `duration_ms`, replacing any existing ban.
    pub fn ban_identity(&self, identity: &str, duration_ms: u64) -> Result<BanRecord> {
        self.ban_identity_at(identity, duration_ms, now_ms())
    }

    /// Same as [`ban_identity`](Self::ban_identity), at an explicit time.
    pub fn ban_identity_at(&self, identity: &str, duration_ms: u64, now: i64) -> Result<BanRecord> {
        let ban = BanRecord::until(deadline(now, duration_ms));
        let stored = self.store.install_ban(identity, ban, BanMerge::Overwrite)?;

        info!(
            identity = %identity,
            duration_ms = duration_ms,
            banned_until = ?to_datetime(stored.expires_at),
            "Client banned by administrator"
        );
        Ok(stored)
    }

    /// Lift the ban on `identity`. Returns whether an active ban was removed.
    /// Window counters are left untouched.
    pub fn unban_identity(&self, identity: &str) -> Result<bool> {
        self.unban_identity_at(identity, now_ms())
    }

    /// Same as [`unban_identity`](Self::unban_identity), at an explicit time.
    pub fn unban_identity_at(&self, identity: &str, now: i64) -> Result<bool> {
        let removed = self
            .store
            .remove_ban(identity)?
            .is_some_and(|ban| ban.is_active(now));

        info!(identity = %identity, removed = removed, "Client unbanned by administrator");
        Ok(removed)
    }

    /// Snapshot of `identity`'s standing on `resource`. Never mutates state.
    pub fn status(&self, identity: &str, resource: &str) -> Result<AdmissionStatus> {
        let policy = self.policy_for(resource);
        self.status_at(identity, resource, &policy, now_ms())
    }

    /// Same as [`status`](Self::status), at an explicit time with an explicit policy.
    pub fn status_at(
        &self,
        identity: &str,
        resource: &str,
        policy: &AdmissionPolicy,
        now: i64,
    ) -> Result<AdmissionStatus> {
        let window = self
            .store
            .window(&WindowKey::new(identity, resource))?
            .filter(|record| record.is_live(now));
        let ban = self.store.active_ban(identity, now)?;

        let remaining = window.map_or(policy.max_requests, |r| r.remaining(policy.max_requests));

        Ok(AdmissionStatus {
            identity: identity.to_string(),
            resource: resource.to_string(),
            limit: policy.max_requests,
            remaining,
            reset_at: window.and_then(|r| to_datetime(r.window_end)),
            limited: remaining == 0,
            banned_until: ban.and_then(|b| to_datetime(b.expires_at)),
        })
    }

    /// Sweep expired entries now. Failures are reported and yield `None`.
    pub fn sweep_expired(&self) -> Option<SweepStats> {
        self.sweep_expired_at(now_ms())
    }

    /// Same as [`sweep_expired`](Self::sweep_expired), at an explicit time.
    pub fn sweep_expired_at(&self, now: i64) -> Option<SweepStats> {
        match self.janitor.sweep(self.store.as_ref(), now) {
            Ok(stats) => Some(stats),
            Err(e) => {
                self.reporter.report(
                    &e,
                    &FailureContext {
                        operation: "sweep",
                        identity: None,
                        resource: None,
                    },
                );
                None
            }
        }
    }

    /// Get the number of stored windows and bans.
    pub fn store_size(&self) -> Result<StoreSize> {
        self.store.size()
    }
}

impl Default for AdmissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::decision::RejectReason;
    use crate::admission::window::WindowRecord;
    use crate::error::GatekeeperError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose every operation fails.
    struct FailingStore;

    impl AdmissionStore for FailingStore {
        fn active_ban(&self, _: &str, _: i64) -> Result<Option<BanRecord>> {
            Err(GatekeeperError::Store("ban lookup failed".to_string()))
        }
        fn install_ban(&self, _: &str, _: BanRecord, _: BanMerge) -> Result<BanRecord> {
            Err(GatekeeperError::Store("ban write failed".to_string()))
        }
        fn remove_ban(&self, _: &str) -> Result<Option<BanRecord>> {
            Err(GatekeeperError::Store("ban removal failed".to_string()))
        }
        fn record_hit(&self, _: &WindowKey, _: i64, _: &AdmissionPolicy) -> Result<WindowHit> {
            Err(GatekeeperError::Store("window write failed".to_string()))
        }
        fn window(&self, _: &WindowKey) -> Result<Option<WindowRecord>> {
            Err(GatekeeperError::Store("window read failed".to_string()))
        }
        fn sweep(&self, _: i64) -> Result<SweepStats> {
            Err(GatekeeperError::Store("sweep failed".to_string()))
        }
        fn size(&self) -> Result<StoreSize> {
            Err(GatekeeperError::Store("size failed".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingReporter {
        reports: AtomicUsize,
    }

    impl ErrorReporter for CountingReporter {
        fn report(&self, _: &GatekeeperError, _: &FailureContext<'_>) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn engine() -> AdmissionEngine {
        AdmissionEngine::builder().sweep_probability(0.0).build()
    }

    fn reason(decision: Decision) -> Option<RejectReason> {
        decision.rejection().map(|r| r.reason)
    }

    #[test]
    fn test_requests_within_quota_are_allowed() {
        let engine = engine();
        let policy = AdmissionPolicy::new(10, 60_000, 100, 3_600_000);

        for i in 0..10 {
            let decision = engine.check_admission_at("1.1.1.1", "/api/enquiry", &policy, i * 100);
            assert!(decision.is_allowed(), "Request {} should be allowed", i + 1);
        }
    }

    #[test]
    fn test_request_over_quota_is_rejected() {
        let engine = engine();
        let policy = AdmissionPolicy::new(10, 60_000, 100, 3_600_000);

        for i in 0..10 {
            engine.check_admission_at("1.1.1.1", "/api/enquiry", &policy, i);
        }

        let rejection = engine
            .check_admission_at("1.1.1.1", "/api/enquiry", &policy, 10)
            .rejection()
            .unwrap();
        assert_eq!(rejection.reason, RejectReason::RateLimited);
        assert!(rejection.retry_after_secs > 0);
        assert_eq!(rejection.retry_after_secs, 60);
    }

    #[test]
    fn test_window_resets_at_window_end() {
        let engine = engine();
        let policy = AdmissionPolicy::new(2, 1_000, 100, 3_600_000);

        engine.check_admission_at("a", "/r", &policy, 0);
        engine.check_admission_at("a", "/r", &policy, 1);
        assert!(!engine.check_admission_at("a", "/r", &policy, 2).is_allowed());

        assert!(engine.check_admission_at("a", "/r", &policy, 1_000).is_allowed());
        let status = engine.status_at("a", "/r", &policy, 1_000).unwrap();
        assert_eq!(status.remaining, 1);
    }

    #[test]
    fn test_ban_escalation_applies_to_every_resource() {
        let engine = engine();
        let policy = AdmissionPolicy::new(10, 60_000, 5, 3_600_000);

        for i in 0..10 {
            assert!(engine.check_admission_at("a", "/api/enquiry", &policy, i).is_allowed());
        }
        for i in 10..15 {
            let decision = engine.check_admission_at("a", "/api/enquiry", &policy, i);
            assert_eq!(reason(decision), Some(RejectReason::RateLimited));
        }

        let decision = engine.check_admission_at("a", "/auth/oauth", &policy, 15);
        assert_eq!(reason(decision), Some(RejectReason::Banned));
        let decision = engine.check_admission_at("a", "/api/enquiry", &policy, 16);
        assert_eq!(reason(decision), Some(RejectReason::Banned));

        // Other identities are unaffected
        assert!(engine.check_admission_at("b", "/api/enquiry", &policy, 17).is_allowed());
    }

    #[test]
    fn test_expired_ban_is_ignored() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 1_000, 1, 5_000);

        engine.check_admission_at("a", "/r", &policy, 0);
        engine.check_admission_at("a", "/r", &policy, 10);
        assert_eq!(
            reason(engine.check_admission_at("a", "/r", &policy, 20)),
            Some(RejectReason::Banned)
        );

        assert!(engine.check_admission_at("a", "/r", &policy, 5_010).is_allowed());
        let status = engine.status_at("a", "/r", &policy, 5_010).unwrap();
        assert_eq!(status.remaining, 0);
        assert_eq!(status.banned_until, None);
    }

    #[test]
    fn test_example_scenario() {
        let engine = engine();
        let policy = AdmissionPolicy::new(3, 1_000, 2, 5_000);
        let check = |now| engine.check_admission_at("9.9.9.9", "/api/enquiry", &policy, now);

        assert!(check(0).is_allowed());
        assert!(check(100).is_allowed());
        assert!(check(200).is_allowed());

        assert_eq!(check(300), Decision::rate_limited(1));
        // Crosses the threshold: still a quota rejection, the ban applies next time
        assert_eq!(check(400), Decision::rate_limited(1));
        assert_eq!(check(500), Decision::banned(5));

        assert!(check(6_000).is_allowed());
    }

    #[test]
    fn test_fail_open_reports_once() {
        let reporter = Arc::new(CountingReporter::default());
        let engine = AdmissionEngine::builder()
            .store(FailingStore)
            .reporter(reporter.clone())
            .sweep_probability(0.0)
            .build();

        let decision = engine.check_admission_at("a", "/r", &AdmissionPolicy::default(), 0);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fail_open_reports_once_when_sweep_also_fails() {
        let reporter = Arc::new(CountingReporter::default());
        let engine = AdmissionEngine::builder()
            .store(FailingStore)
            .reporter(reporter.clone())
            .sweep_probability(1.0)
            .build();

        let decision = engine.check_admission_at("a", "/r", &AdmissionPolicy::default(), 0);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_sweep_is_reported() {
        let reporter = Arc::new(CountingReporter::default());
        let engine = AdmissionEngine::builder()
            .store(FailingStore)
            .reporter(reporter.clone())
            .build();

        assert_eq!(engine.sweep_expired_at(0), None);
        assert_eq!(reporter.reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_twice_is_noop() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 100, 1, 200);
        engine.check_admission_at("a", "/r", &policy, 0);
        engine.check_admission_at("a", "/r", &policy, 1);
        engine.check_admission_at("b", "/r", &policy, 5_000);

        let first = engine.sweep_expired_at(1_000).unwrap();
        assert_eq!(first.windows_removed, 1);
        assert_eq!(first.bans_removed, 1);
        let size = engine.store_size().unwrap();

        assert_eq!(engine.sweep_expired_at(1_000), Some(SweepStats::default()));
        assert_eq!(engine.store_size().unwrap(), size);
    }

    #[test]
    fn test_manual_ban_and_unban() {
        let engine = engine();
        let policy = AdmissionPolicy::default();

        let ban = engine.ban_identity_at("a", 10_000, 0).unwrap();
        assert_eq!(ban.expires_at, 10_000);
        assert_eq!(
            engine.check_admission_at("a", "/r", &policy, 1_000),
            Decision::banned(9)
        );

        assert!(engine.unban_identity_at("a", 2_000).unwrap());
        assert!(!engine.unban_identity_at("a", 2_000).unwrap());
        assert!(engine.check_admission_at("a", "/r", &policy, 2_000).is_allowed());
    }

    #[test]
    fn test_unban_leaves_windows_untouched() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 60_000, 100, 1_000);

        engine.check_admission_at("a", "/r", &policy, 0);
        engine.ban_identity_at("a", 10_000, 0).unwrap();
        engine.unban_identity_at("a", 100).unwrap();

        assert_eq!(
            reason(engine.check_admission_at("a", "/r", &policy, 200)),
            Some(RejectReason::RateLimited)
        );
    }

    #[test]
    fn test_unban_of_expired_ban_returns_false() {
        let engine = engine();
        engine.ban_identity_at("a", 100, 0).unwrap();
        assert!(!engine.unban_identity_at("a", 500).unwrap());
    }

    #[test]
    fn test_manual_ban_overwrites_automatic_ban() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 60_000, 1, 1_000);

        engine.check_admission_at("a", "/r", &policy, 0);
        engine.check_admission_at("a", "/r", &policy, 1);
        let status = engine.status_at("a", "/r", &policy, 2).unwrap();
        assert_eq!(status.banned_until, to_datetime(1_001));

        engine.ban_identity_at("a", 100_000, 2).unwrap();
        let status = engine.status_at("a", "/r", &policy, 3).unwrap();
        assert_eq!(status.banned_until, to_datetime(100_002));

        // An operator may also shorten a ban
        engine.ban_identity_at("a", 10, 3).unwrap();
        assert!(engine.check_admission_at("a", "/x", &policy, 20).is_allowed());
    }

    #[test]
    fn test_status_is_read_only() {
        let engine = engine();
        let policy = AdmissionPolicy::new(3, 1_000, 100, 3_600_000);

        let status = engine.status_at("a", "/r", &policy, 0).unwrap();
        assert_eq!(status.remaining, 3);
        assert_eq!(status.reset_at, None);
        assert!(!status.limited);
        assert_eq!(engine.store_size().unwrap().windows, 0);

        engine.check_admission_at("a", "/r", &policy, 0);
        for _ in 0..5 {
            engine.status_at("a", "/r", &policy, 10).unwrap();
        }
        let status = engine.status_at("a", "/r", &policy, 10).unwrap();
        assert_eq!(status.remaining, 2);
        assert_eq!(status.reset_at, to_datetime(1_000));
    }

    #[test]
    fn test_status_limited_at_exact_quota() {
        let engine = engine();
        let policy = AdmissionPolicy::new(2, 1_000, 100, 3_600_000);

        engine.check_admission_at("a", "/r", &policy, 0);
        let status = engine.status_at("a", "/r", &policy, 1).unwrap();
        assert_eq!(status.remaining, 1);
        assert!(!status.limited);

        engine.check_admission_at("a", "/r", &policy, 2);
        let status = engine.status_at("a", "/r", &policy, 3).unwrap();
        assert_eq!(status.remaining, 0);
        assert!(status.limited);
        assert!(!engine.check_admission_at("a", "/r", &policy, 4).is_allowed());
    }

    #[test]
    fn test_status_clamps_remaining_at_zero() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 1_000, 100, 3_600_000);

        for i in 0..4 {
            engine.check_admission_at("a", "/r", &policy, i);
        }
        let status = engine.status_at("a", "/r", &policy, 5).unwrap();
        assert_eq!(status.remaining, 0);
        assert!(status.limited);
    }

    #[test]
    fn test_resources_have_separate_windows() {
        let engine = engine();
        let policy = AdmissionPolicy::new(1, 60_000, 100, 3_600_000);

        assert!(engine.check_admission_at("a", "/one", &policy, 0).is_allowed());
        assert!(engine.check_admission_at("a", "/two", &policy, 0).is_allowed());
        assert!(!engine.check_admission_at("a", "/one", &policy, 1).is_allowed());
    }

    #[test]
    fn test_policy_table_is_used_for_resource() {
        use crate::admission::policy::ResourceRule;

        let mut rule = ResourceRule::new("/api/enquiry");
        rule.max_requests = Some(1);
        let engine = AdmissionEngine::builder()
            .policies(PolicyTable::new(AdmissionPolicy::default(), vec![rule]))
            .sweep_probability(0.0)
            .build();

        assert!(engine.check_admission("a", "/api/enquiry").is_allowed());
        assert!(!engine.check_admission("a", "/api/enquiry").is_allowed());
        assert!(engine.check_admission("a", "/other").is_allowed());

        engine.set_policies(PolicyTable::default());
        assert_eq!(engine.policy_for("/api/enquiry"), AdmissionPolicy::default());
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_the_quota() {
        let engine = Arc::new(engine());
        let policy = AdmissionPolicy::new(100, 60_000, 1_000_000, 1_000);
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if engine.check_admission_at("a", "/r", &policy, 0).is_allowed() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 100);
    }
}
