//! Admission decisions returned to the calling layer.

use serde::Serialize;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The window quota for this resource is used up
    RateLimited,
    /// The identity is banned from every resource
    Banned,
}

impl RejectReason {
    /// Machine-readable reason code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimited => "rate_limited",
            RejectReason::Banned => "banned",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected request, with a hint for when to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rejection {
    #[serde(rename = "error")]
    pub reason: RejectReason,
    #[serde(rename = "retry_after_seconds")]
    pub retry_after_secs: u64,
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject(Rejection),
}

impl Decision {
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Decision::Reject(Rejection {
            reason: RejectReason::RateLimited,
            retry_after_secs,
        })
    }

    pub fn banned(retry_after_secs: u64) -> Self {
        Decision::Reject(Rejection {
            reason: RejectReason::Banned,
            retry_after_secs,
        })
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// The rejection details, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Decision::Allow => None,
            Decision::Reject(rejection) => Some(*rejection),
        }
    }
}
