//! Unit routes: listing, lifecycle operations, removal and run permission.

use std::str::FromStr;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;
use tracing::info;

use ironbot_control::{Operation, QueueKind, ResolveReport, Target};
use ironbot_core::error::ConfigError;
use ironbot_core::unit::{UnitId, UnitSpec};
use ironbot_supervisor::RunDecision;
use ironbot_topology::ResolvedUnit;

use super::error::{ApiError, Result};
use super::{AppState, Envelope, batch_response, ok};

/// GET /api/v1/units
pub async fn list_all(State(state): State<AppState>) -> Result<Json<Envelope<Vec<ResolvedUnit>>>> {
    Ok(ok(state.controller.units(&Target::All).await?))
}

/// GET /api/v1/units/{target}
///
/// Shares the `{id}` path segment with the unit routes; any target is accepted.
pub async fn list_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<Envelope<Vec<ResolvedUnit>>>> {
    Ok(ok(state.controller.units(&Target::parse(&target)).await?))
}

/// PUT /api/v1/units/{id}
///
/// Add or replace one unit and apply the resulting document.
pub async fn put_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<UnitSpec>, JsonRejection>,
) -> Result<Json<Envelope<ResolveReport>>> {
    let Json(mut spec) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = UnitId::from(id.as_str());
    if spec.id.as_str().is_empty() {
        spec.id = id.clone();
    } else if spec.id != id {
        return Err(ApiError::Core(
            ConfigError::InvalidValue {
                field: format!("units.{id}.id"),
                reason: format!("id '{}' does not match path", spec.id),
            }
            .into(),
        ));
    }
    info!(unit_id = %id, "unit definition received");
    Ok(ok(state.controller.add_unit(spec).await?))
}

/// DELETE /api/v1/units/{id}
pub async fn delete_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ResolveReport>>> {
    let report = state.controller.remove_unit(&UnitId::from(id.as_str())).await?;
    Ok(ok(report))
}

/// Run permission for a worker loop.
#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub unit_id: UnitId,
    #[serde(flatten)]
    pub decision: RunDecision,
}

/// POST /api/v1/units/{id}/acquire
pub async fn acquire(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<AcquireResponse>>> {
    let unit_id = UnitId::from(id.as_str());
    let decision = state.controller.acquire_run(&unit_id).await?;
    Ok(ok(AcquireResponse { unit_id, decision }))
}

/// GET /api/v1/status
pub async fn status_all(State(state): State<AppState>) -> Result<Response> {
    Ok(batch_response(state.controller.status(&Target::All).await?))
}

/// GET /api/v1/status/{target}
pub async fn status_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Response> {
    let report = state.controller.status(&Target::parse(&target)).await?;
    Ok(batch_response(report))
}

/// POST /api/v1/{op}
pub async fn run_all(State(state): State<AppState>, Path(op): Path<String>) -> Result<Response> {
    run(&state, &op, Target::All).await
}

/// POST /api/v1/{op}/{target}
pub async fn run_target(
    State(state): State<AppState>,
    Path((op, target)): Path<(String, String)>,
) -> Result<Response> {
    run(&state, &op, Target::parse(&target)).await
}

async fn run(state: &AppState, op: &str, target: Target) -> Result<Response> {
    let operation = Operation::from_str(op).map_err(ApiError::NotFound)?;
    let report = state.controller.run(operation, &target).await?;
    Ok(batch_response(report))
}

/// Derived queue names.
#[derive(Debug, Serialize)]
pub struct QueueList {
    pub kind: QueueKind,
    pub queues: Vec<String>,
}

/// GET /api/v1/queues
pub async fn queues_all(State(state): State<AppState>) -> Json<Envelope<QueueList>> {
    ok(QueueList {
        kind: QueueKind::All,
        queues: state.controller.queues(QueueKind::All).await,
    })
}

/// GET /api/v1/queues/{kind}
pub async fn queues_kind(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Envelope<QueueList>>> {
    let kind = QueueKind::from_str(&kind).map_err(ApiError::NotFound)?;
    Ok(ok(QueueList {
        kind,
        queues: state.controller.queues(kind).await,
    }))
}
