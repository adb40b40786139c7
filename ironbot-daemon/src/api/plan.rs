//! Plan routes: read, replace and dry-run the pipeline document.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use ironbot_control::ResolveReport;
use ironbot_core::unit::PipelineConfig;
use ironbot_topology::PipelinePlan;

use super::error::{ApiError, Result};
use super::{AppState, Envelope, ok};

/// GET /api/v1/plan
pub async fn get_plan(State(state): State<AppState>) -> Json<Envelope<PipelinePlan>> {
    let plan = state.controller.plan().await;
    ok(PipelinePlan::clone(&plan))
}

/// PUT /api/v1/plan
///
/// Resolve and apply a full pipeline document. 422 with every resolution
/// error when it does not resolve; the running plan is untouched.
pub async fn put_plan(
    State(state): State<AppState>,
    body: std::result::Result<Json<PipelineConfig>, JsonRejection>,
) -> Result<Json<Envelope<ResolveReport>>> {
    let config = document(body)?;
    let report = state.controller.resolve(config).await?;
    Ok(ok(report))
}

/// POST /api/v1/plan/check
pub async fn check_plan(
    State(state): State<AppState>,
    body: std::result::Result<Json<PipelineConfig>, JsonRejection>,
) -> Result<Json<Envelope<ResolveReport>>> {
    let config = document(body)?;
    let report = state.controller.check(&config).await?;
    Ok(ok(report))
}

/// Unwrap a JSON document and fill unit ids from their map keys.
fn document(
    body: std::result::Result<Json<PipelineConfig>, JsonRejection>,
) -> Result<PipelineConfig> {
    let Json(mut config) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    config
        .normalize()
        .map_err(|e| ApiError::Core(e.into()))?;
    Ok(config)
}
