//! Error reporting for fail-open diagnostics.
//!
//! Reports are informational only: nothing in the admission path branches on
//! whether a report was delivered.

use tracing::error;

use crate::error::GatekeeperError;

/// Context attached to a bookkeeping failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext<'a> {
    /// The operation that failed, e.g. `check_admission` or `sweep`
    pub operation: &'static str,
    pub identity: Option<&'a str>,
    pub resource: Option<&'a str>,
}

/// Receives internal failures that the engine recovered from.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &GatekeeperError, context: &FailureContext<'_>);
}

/// Reporter that emits failures as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &GatekeeperError, context: &FailureContext<'_>) {
        error!(
            error = %error,
            operation = context.operation,
            identity = context.identity.unwrap_or("-"),
            resource = context.resource.unwrap_or("-"),
            "Admission bookkeeping failed"
        );
    }
}
