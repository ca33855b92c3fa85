//! Admission middleware for protecting axum routes in-process.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::admission::{resolve_client_identity, AdmissionEngine, Decision};

/// Run the admission check before the wrapped handler.
///
/// The request path is the resource key; the identity comes from proxy
/// headers. Rejected requests never reach the handler.
pub async fn admission_layer(
    State(engine): State<Arc<AdmissionEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = resolve_client_identity(request.headers());
    let resource = request.uri().path().to_string();

    match engine.check_admission(&identity, &resource) {
        Decision::Allow => next.run(request).await,
        Decision::Reject(rejection) => rejection.into_response(),
    }
}

/// Put every route of `router` behind the admission check.
pub fn protect<S>(router: Router<S>, engine: Arc<AdmissionEngine>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(engine, admission_layer))
}
