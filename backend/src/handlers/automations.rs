//! Trigger dispatch
//!
//! Form-submission and pipeline-stage handlers call this once they have
//! stored the triggering fact. The request returns when the run is over.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::automations::RunReport;
use crate::{ApiError, ApiResult, AppError, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct DispatchRequest {
    #[validate(length(min = 1, message = "automation_id is required"))]
    pub automation_id: String,
    #[validate(length(min = 1, message = "person_id is required"))]
    pub person_id: String,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub report: RunReport,
}

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new().route("/dispatch", post(dispatch_automation))
}

#[instrument(skip_all)]
async fn dispatch_automation(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> ApiResult<Json<DispatchResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let automation_id = parse_id("automation_id", &request.automation_id)?;
    let person_id = parse_id("person_id", &request.person_id)?;

    tracing::info!(%automation_id, %person_id, "Dispatching automation");

    // Spawned so a caller hanging up does not cut the run short.
    let runner = state.runner.clone();
    let shutdown = state.shutdown.clone();
    let report = tokio::spawn(async move {
        runner
            .run_with_cancellation(automation_id, person_id, &shutdown)
            .await
    })
    .await
    .map_err(|e| AppError::InternalError(format!("automation run task failed: {}", e)))??;

    Ok(Json(DispatchResponse { success: true, report }))
}

fn parse_id(field: &str, raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::validation_single(field, format!("{} must be a UUID", field)))
}
