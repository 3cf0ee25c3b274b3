pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::lifecycle::ServiceLink;
use crate::observability::tracing::propagate_inbound_context;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub link: Arc<ServiceLink>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(link: Arc<ServiceLink>) -> Self {
        let api_key = Arc::from(link.config().admin.api_key.as_str());
        Self { link, api_key }
    }
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/{service}/{group}/reset", post(reset_breaker))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(middleware::from_fn(propagate_inbound_context))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
}
