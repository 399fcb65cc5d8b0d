use axum::{extract::State, Json};
use serde::Serialize;

use crate::uninstall::StepStatus;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    runs: usize,
    /// Distinct specs held in storage; can exceed the run count when
    /// uninstalled runs leave their specs behind.
    specs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    deregister: Option<StepStatus>,
}

/// `GET /v1/health`
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let specs = state
        .persister
        .children("Specs")
        .map(|ids| ids.len())
        .unwrap_or(0);
    Json(HealthResponse {
        status: "ok",
        runs: state.manager.registry().len().await,
        specs,
        deregister: state.router.deregister_status(),
    })
}
