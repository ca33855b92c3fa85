//! Gatekeeper - Admission Control for Public Endpoints
//!
//! This crate protects public HTTP endpoints from excessive or abusive
//! traffic. Requests are counted per client identity and resource in fixed
//! windows, repeat offenders are escalated into temporary bans, and expired
//! bookkeeping is reclaimed by probabilistic sweeps. When its own bookkeeping
//! fails, the engine lets traffic through.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
pub mod report;
