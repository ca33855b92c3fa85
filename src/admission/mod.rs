//! Admission control: window counting, ban escalation and expiry sweeps.

mod ban;
pub mod clock;
mod decision;
mod engine;
mod identity;
mod janitor;
mod policy;
mod store;
mod window;

pub use ban::{BanMerge, BanRecord};
pub use decision::{Decision, RejectReason, Rejection};
pub use engine::{AdmissionEngine, AdmissionEngineBuilder, AdmissionStatus};
pub use identity::{resolve_client_identity, FORWARDED_FOR_HEADER, REAL_IP_HEADER, UNKNOWN_IDENTITY};
pub use janitor::{spawn_periodic_sweep, Janitor, DEFAULT_SWEEP_PROBABILITY};
pub use policy::{AdmissionPolicy, PolicyTable, ResourceRule};
pub use store::{AdmissionStore, InMemoryStore, StoreSize, SweepStats};
pub use window::{WindowHit, WindowKey, WindowRecord};
