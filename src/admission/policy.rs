//! Admission policies and per-resource policy matching.
//!
//! A policy carries the four tunables of the admission check. Each protected
//! resource may override any subset of them; the rest are inherited from the
//! default policy.

use serde::{Deserialize, Serialize};

use crate::error::{GatekeeperError, Result};

/// Default maximum requests per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 10;
/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Default number of excess requests before a ban is issued.
pub const DEFAULT_BAN_THRESHOLD: u64 = 100;
/// Default ban length in milliseconds.
pub const DEFAULT_BAN_DURATION_MS: u64 = 3_600_000;

/// The tunables applied to one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    /// Maximum requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Excess requests within one window that escalate to a ban
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u64,
    /// Ban length in milliseconds
    #[serde(default = "default_ban_duration_ms")]
    pub ban_duration_ms: u64,
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_ban_threshold() -> u64 {
    DEFAULT_BAN_THRESHOLD
}

fn default_ban_duration_ms() -> u64 {
    DEFAULT_BAN_DURATION_MS
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            ban_duration_ms: DEFAULT_BAN_DURATION_MS,
        }
    }
}

impl AdmissionPolicy {
    /// Create a policy from explicit tunables.
    pub fn new(max_requests: u64, window_ms: u64, ban_threshold: u64, ban_duration_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            ban_threshold,
            ban_duration_ms,
        }
    }

    /// Reject tunables that would make the admission check meaningless.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("max_requests", self.max_requests),
            ("window_ms", self.window_ms),
            ("ban_threshold", self.ban_threshold),
            ("ban_duration_ms", self.ban_duration_ms),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(GatekeeperError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

/// A per-resource override.
///
/// `resource` is either an exact path (`/api/enquiry`) or a prefix ending in
/// `*` (`/auth/*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRule {
    /// Exact resource key or `*`-terminated prefix
    pub resource: String,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub ban_threshold: Option<u64>,
    #[serde(default)]
    pub ban_duration_ms: Option<u64>,
}

impl ResourceRule {
    /// Create a rule with no overrides.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            max_requests: None,
            window_ms: None,
            ban_threshold: None,
            ban_duration_ms: None,
        }
    }

    /// How specifically this rule matches `resource`, or `None` if it does not.
    ///
    /// Exact matches beat every prefix; longer prefixes beat shorter ones.
    fn specificity(&self, resource: &str) -> Option<usize> {
        match self.resource.strip_suffix('*') {
            Some(prefix) if resource.starts_with(prefix) => Some(prefix.len()),
            Some(_) => None,
            None if self.resource == resource => Some(usize::MAX),
            None => None,
        }
    }

    /// Layer this rule's overrides on top of `base`.
    fn apply(&self, base: AdmissionPolicy) -> AdmissionPolicy {
        AdmissionPolicy {
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_ms: self.window_ms.unwrap_or(base.window_ms),
            ban_threshold: self.ban_threshold.unwrap_or(base.ban_threshold),
            ban_duration_ms: self.ban_duration_ms.unwrap_or(base.ban_duration_ms),
        }
    }
}

/// The default policy plus per-resource overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    default_policy: AdmissionPolicy,
    rules: Vec<ResourceRule>,
}

impl PolicyTable {
    /// Create a table from a default policy and a list of overrides.
    pub fn new(default_policy: AdmissionPolicy, rules: Vec<ResourceRule>) -> Self {
        Self {
            default_policy,
            rules,
        }
    }

    /// A table that applies one policy to every resource.
    pub fn uniform(policy: AdmissionPolicy) -> Self {
        Self::new(policy, Vec::new())
    }

    /// The policy applied when no rule matches.
    pub fn default_policy(&self) -> AdmissionPolicy {
        self.default_policy
    }

    /// The configured overrides.
    pub fn rules(&self) -> &[ResourceRule] {
        &self.rules
    }

    /// Resolve the effective policy for a resource key.
    pub fn find_policy(&self, resource: &str) -> AdmissionPolicy {
        let mut best: Option<(usize, &ResourceRule)> = None;

        for rule in &self.rules {
            if let Some(score) = rule.specificity(resource) {
                // First rule wins on ties
                if best.map_or(true, |(best_score, _)| score > best_score) {
                    best = Some((score, rule));
                }
            }
        }

        match best {
            Some((_, rule)) => rule.apply(self.default_policy),
            None => self.default_policy,
        }
    }

    /// Validate the default policy and every resolved override.
    pub fn validate(&self) -> Result<()> {
        self.default_policy.validate()?;
        for rule in &self.rules {
            if rule.resource.is_empty() {
                return Err(GatekeeperError::Config(
                    "resource rule with empty resource".to_string(),
                ));
            }
            rule.apply(self.default_policy).validate().map_err(|e| {
                GatekeeperError::Config(format!("resource '{}': {}", rule.resource, e))
            })?;
        }
        Ok(())
    }
}
