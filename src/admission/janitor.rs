//! Expiry sweeps that bound memory growth of the admission stores.
//!
//! Sweeps are triggered on a random fraction of admission checks, so no
//! scheduler is required. A periodic task can be added on top for
//! deployments with long idle stretches.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::debug;

use super::engine::AdmissionEngine;
use super::store::{AdmissionStore, SweepStats};
use crate::error::Result;

/// Default fraction of admission checks that trigger a sweep.
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.1;

/// Probabilistic sweeper for expired windows and bans.
#[derive(Debug, Clone, Copy)]
pub struct Janitor {
    probability: f64,
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_PROBABILITY)
    }
}

impl Janitor {
    /// Create a janitor that sweeps on `probability` of calls, clamped to `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }

    /// The configured sweep probability.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Sweep with the configured probability. Returns `Ok(None)` when the
    /// roll did not trigger a sweep.
    pub fn maybe_sweep(&self, store: &dyn AdmissionStore, now: i64) -> Result<Option<SweepStats>> {
        if !rand::thread_rng().gen_bool(self.probability) {
            return Ok(None);
        }
        self.sweep(store, now).map(Some)
    }

    /// Sweep unconditionally.
    pub fn sweep(&self, store: &dyn AdmissionStore, now: i64) -> Result<SweepStats> {
        let stats = store.sweep(now)?;
        debug!(
            windows_removed = stats.windows_removed,
            bans_removed = stats.bans_removed,
            "Swept expired admission entries"
        );
        Ok(stats)
    }
}

/// Spawn a task that sweeps the engine's stores every `interval`.
pub fn spawn_periodic_sweep(engine: Arc<AdmissionEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            engine.sweep_expired();
        }
    })
}
