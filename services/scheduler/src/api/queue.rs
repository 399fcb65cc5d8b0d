use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::run::RunMode;
use crate::state::SUBMITTED_AT_PROPERTY;

use super::{ApiError, AppState};

#[derive(Serialize)]
pub struct RunInfo {
    name: String,
    #[serde(rename = "spec-id", skip_serializing_if = "Option::is_none")]
    spec_id: Option<String>,
    goal: &'static str,
    uninstall: bool,
    #[serde(rename = "submitted-at", skip_serializing_if = "Option::is_none")]
    submitted_at: Option<String>,
}

/// `GET /v1/queue` — lists hosted runs.
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunInfo>> {
    let mut runs = Vec::new();
    for name in state.manager.names().await {
        // A run can disappear while we iterate; skip it rather than error.
        let Some(run) = state.manager.get(&name).await else {
            continue;
        };
        let spec_id = state.spec_store.spec_id_of(run.state_store()).ok().flatten();
        let submitted_at = run
            .state_store()
            .fetch_property_opt(SUBMITTED_AT_PROPERTY)
            .ok()
            .flatten()
            .map(|b| String::from_utf8_lossy(&b).into_owned());
        let uninstall = run.mode() == RunMode::Uninstalling;
        runs.push(RunInfo {
            name,
            spec_id,
            goal: if uninstall { "UNINSTALL" } else { "RUNNING" },
            uninstall,
            submitted_at,
        });
    }
    Json(runs)
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    /// Spec type selecting the generator; falls back to the configured
    /// default when omitted.
    #[serde(rename = "type")]
    spec_type: Option<String>,
    /// Base64-encoded submission payload.
    data: String,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    name: String,
}

/// `POST /v1/queue` — submits a new run.
pub async fn submit_run(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let spec_type = request
        .spec_type
        .or_else(|| state.default_spec_type.clone())
        .ok_or_else(|| ApiError::bad_request("missing 'type' and no default type configured"))?;

    let Some(generator) = state.generators.get(&spec_type) else {
        let known: Vec<&String> = state.generators.keys().collect();
        return Err(ApiError::bad_request(format!(
            "invalid 'type' value '{spec_type}', must be one of: {known:?}"
        )));
    };

    let data = base64::engine::general_purpose::STANDARD
        .decode(&request.data)
        .map_err(|e| ApiError::bad_request(format!("payload is not valid base64: {e}")))?;
    let limit = generator.max_data_size_bytes();
    if limit > 0 && data.len() > limit {
        return Err(ApiError::bad_request(format!(
            "payload size {} exceeds limit of {limit} bytes",
            data.len()
        )));
    }

    let run = generator.generate(&data).await.map_err(|e| {
        error!(error = %e, "Failed to generate run from payload");
        ApiError::bad_request(format!("failed to generate run from payload: {e}"))
    })?;
    let name = run.name().to_string();

    // Refuse duplicates before touching storage, so a resubmission cannot
    // clobber the live run's spec back-reference.
    if state.manager.get(&name).await.is_some() {
        return Err(ApiError::bad_request(format!(
            "run named '{name}' is already present"
        )));
    }

    state
        .spec_store
        .store(run.state_store(), &data, &spec_type)
        .map_err(|e| {
            error!(run = %name, error = %e, "Failed to store spec");
            ApiError::bad_request(format!("failed to store spec: {e}"))
        })?;
    if let Err(e) = run
        .state_store()
        .store_property(SUBMITTED_AT_PROPERTY, Utc::now().to_rfc3339().as_bytes())
    {
        error!(run = %name, error = %e, "Failed to record submission time");
    }

    if let Err(e) = state.manager.put(run).await {
        // Lost a race with a concurrent submission of the same name.
        error!(run = %name, error = %e, "Failed to add run");
        return Err(ApiError::bad_request(format!("failed to add run: {e}")));
    }

    info!(run = %name, spec_type = %spec_type, "Admitted run");
    Ok(Json(SubmitResponse { name }))
}

/// `DELETE /v1/queue/{run_name}` — begins uninstalling a run.
pub async fn uninstall_run(
    State(state): State<AppState>,
    Path(run_name): Path<String>,
) -> Result<String, ApiError> {
    if state.manager.get(&run_name).await.is_none() {
        return Err(ApiError::not_found(format!("run '{run_name}' not found")));
    }
    state.manager.start_uninstall(&[run_name.clone()]).await;
    Ok(format!("Triggered removal of run: {run_name}"))
}
