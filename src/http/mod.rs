//! HTTP integration: in-process middleware, decision API and admin API.

pub mod admin;
mod middleware;
mod response;
mod server;
mod service;

use std::sync::Arc;

use crate::admission::AdmissionEngine;

pub use middleware::{admission_layer, protect};
pub use response::ApiError;
pub use server::{build_router, HttpServer};
pub use service::{check, CheckRequest, CheckResponse};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The admission engine
    pub engine: Arc<AdmissionEngine>,
    /// Bearer token for the admin routes, if any
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<AdmissionEngine>, admin_token: Option<String>) -> Self {
        Self {
            engine,
            admin_token: admin_token.map(Arc::from),
        }
    }
}
