use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::load_balancer::ServiceSnapshot;
use crate::resilience::{BreakerSnapshot, CircuitState};
use super::AdminState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub services: usize,
    pub unhealthy_endpoints: usize,
    pub open_breakers: usize,
    pub fallbacks_served: u64,
}

#[derive(Serialize)]
pub struct ResetResult {
    pub service: String,
    pub group: String,
    pub reset: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let link = &state.link;
    let services = link.registry().snapshot();
    let unhealthy_endpoints = services
        .iter()
        .flat_map(|s| s.endpoints.iter())
        .filter(|e| !e.healthy)
        .count();
    let open_breakers = link
        .breakers()
        .snapshot()
        .iter()
        .filter(|b| b.state != CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if unhealthy_endpoints == 0 && open_breakers == 0 {
            "operational"
        } else {
            "degraded"
        },
        uptime_secs: link.uptime().as_secs(),
        services: services.len(),
        unhealthy_endpoints,
        open_breakers,
        fallbacks_served: link.degradation().invocations(),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceSnapshot>> {
    Json(state.link.registry().snapshot())
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.link.breakers().snapshot())
}

pub async fn reset_breaker(
    State(state): State<AdminState>,
    Path((service, group)): Path<(String, String)>,
) -> Result<Json<ResetResult>, StatusCode> {
    if !state.link.breakers().reset(&service, &group) {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::info!(service = %service, group = %group, "Breaker reset via admin API");
    Ok(Json(ResetResult {
        service,
        group,
        reset: true,
    }))
}
