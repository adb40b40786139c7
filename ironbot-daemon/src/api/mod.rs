//! HTTP management API
//!
//! Thin axum adapter over [`Controller`]. Handlers parse the path and body,
//! call the facade and wrap the result in `{"status": "ok", "data": ...}`.

pub mod error;
pub mod plan;
pub mod units;

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::Serialize;

use ironbot_control::{BatchReport, Controller, Target, VersionInfo};

use crate::health::{self, DaemonHealth};
use error::status_for_kind;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            start_time: Instant::now(),
        }
    }
}

/// Success body.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { status: "ok", data })
}

/// 200 when every unit succeeded, 207 when some failed, and the status of the
/// shared error kind when all of them failed.
pub(crate) fn batch_response(report: BatchReport) -> Response {
    let code = if !report.has_errors() {
        StatusCode::OK
    } else if report.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        report
            .outcomes
            .iter()
            .find_map(|o| o.error())
            .map(|e| status_for_kind(&e.kind))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    let status = if report.has_errors() { "error" } else { "ok" };
    (
        code,
        Json(Envelope {
            status,
            data: report,
        }),
    )
        .into_response()
}

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/plan", get(plan::get_plan).put(plan::put_plan))
        .route("/plan/check", post(plan::check_plan))
        .route("/units", get(units::list_all))
        .route(
            "/units/{id}",
            get(units::list_target)
                .put(units::put_unit)
                .delete(units::delete_unit),
        )
        .route("/units/{id}/acquire", post(units::acquire))
        .route("/status", get(units::status_all).post(units::status_all))
        .route(
            "/status/{target}",
            get(units::status_target).post(units::status_target),
        )
        .route("/queues", get(units::queues_all))
        .route("/queues/{kind}", get(units::queues_kind))
        .route("/{op}", post(units::run_all))
        .route("/{op}/{target}", post(units::run_target));

    Router::new()
        .route("/", get(version))
        .route("/health", get(health_handler))
        .nest("/api/v1", api)
        .with_state(state)
}

/// GET /
async fn version(State(state): State<AppState>) -> Json<Envelope<VersionInfo>> {
    ok(state.controller.version())
}

/// GET /health
///
/// Always 200 while the daemon is serving; the body carries the aggregated state.
async fn health_handler(State(state): State<AppState>) -> error::Result<Json<Envelope<DaemonHealth>>> {
    let report = state.controller.status(&Target::All).await?;
    let (health, units) = health::aggregate(&report);
    let uptime_secs = state.start_time.elapsed().as_secs();

    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(ironbot_core::metrics::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);

    Ok(ok(DaemonHealth {
        health,
        uptime_secs,
        version: env!("CARGO_PKG_VERSION"),
        plan_fingerprint: state.controller.plan().await.fingerprint().to_owned(),
        units,
    }))
}
