use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::batch::{active_units, run_batch, BatchOutcome, BatchUnit};
use crate::error::EngineError;
use crate::models::*;
use crate::projection::TrainingPlan;
use crate::reconcile::{CallContext, CourseOutcome, Engine, Reconciled, Trigger};
use crate::store::ProgressStore;

type AppState<S> = Arc<Engine<S>>;
type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn router<S: ProgressStore + 'static>(engine: Arc<Engine<S>>) -> Router {
    Router::new()
        // triggers
        .route("/api/students/:student_id/recompute", post(recompute_student::<S>))
        .route("/api/students/:student_id/courses/:course_id/recompute", post(recompute_course::<S>))
        .route("/api/students/:student_id/attempts/:attempt_id/submitted", post(attempt_submitted::<S>))
        .route("/api/students/:student_id/enrollments/:course_id/created", post(enrollment_created::<S>))
        // manual actions
        .route("/api/students/:student_id/courses/:course_id/marks", post(mark_node::<S>))
        .route("/api/students/:student_id/lessons/:lesson_id/competency", post(mark_competent::<S>))
        // read models
        .route("/api/students/:student_id/courses/:course_id/training-plan", get(training_plan::<S>))
        .route("/api/reports/batch", post(report_batch::<S>))
        .with_state(engine)
}

async fn recompute_student<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path(student_id): Path<Id>,
) -> ApiResult<Vec<CourseOutcome>> {
    let ctx = CallContext::new(Trigger::Recompute);
    let outcomes = engine.recompute_student(&ctx, student_id).await.map_err(reject)?;
    Ok(Json(outcomes))
}

async fn recompute_course<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, course_id)): Path<(Id, Id)>,
) -> ApiResult<Reconciled> {
    let ctx = CallContext::new(Trigger::Recompute);
    let reconciled = engine.recompute_course(&ctx, student_id, course_id).await.map_err(reject)?;
    Ok(Json(reconciled))
}

async fn attempt_submitted<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, attempt_id)): Path<(Id, Id)>,
) -> ApiResult<Vec<CourseOutcome>> {
    let ctx = CallContext::new(Trigger::AttemptSubmitted);
    let outcomes = engine.on_attempt_submitted(&ctx, student_id, attempt_id).await.map_err(reject)?;
    Ok(Json(outcomes))
}

async fn enrollment_created<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, course_id)): Path<(Id, Id)>,
) -> ApiResult<Reconciled> {
    let ctx = CallContext::new(Trigger::EnrollmentCreated);
    let reconciled = engine.on_enrollment_created(&ctx, student_id, course_id).await.map_err(reject)?;
    Ok(Json(reconciled))
}

async fn mark_node<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, course_id)): Path<(Id, Id)>,
    Json(req): Json<MarkNodeReq>,
) -> ApiResult<Reconciled> {
    let ctx = CallContext::new(Trigger::NodeMarked);
    let reconciled = engine.mark_node_complete(&ctx, student_id, course_id, &req).await.map_err(reject)?;
    Ok(Json(reconciled))
}

async fn mark_competent<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, lesson_id)): Path<(Id, Id)>,
    Json(req): Json<MarkCompetencyReq>,
) -> ApiResult<serde_json::Value> {
    if req.remarks.trim().is_empty() {
        return Err(e400("remarks are required"));
    }
    let ctx = CallContext::new(Trigger::CompetencyMarked);
    let saved = engine.mark_competent(&ctx, student_id, lesson_id, &req).await.map_err(reject)?;
    Ok(Json(match saved {
        Some(competency) => serde_json::json!({ "changed": true, "competency": competency }),
        None => serde_json::json!({ "changed": false }),
    }))
}

async fn training_plan<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    Path((student_id, course_id)): Path<(Id, Id)>,
) -> ApiResult<TrainingPlan> {
    let plan = engine
        .store()
        .load_training_plan(student_id, course_id)
        .await
        .map_err(reject)?
        .ok_or_else(|| e404("training plan not computed"))?;
    Ok(Json(plan))
}

#[derive(Deserialize, Default)]
struct BatchReq {
    /// Explicit units; every active enrollment when absent.
    units: Option<Vec<BatchUnit>>,
}

async fn report_batch<S: ProgressStore + 'static>(
    State(engine): State<AppState<S>>,
    body: Option<Json<BatchReq>>,
) -> ApiResult<BatchOutcome> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let units = match req.units {
        Some(units) => units,
        None => active_units(engine.store()).await.map_err(reject)?,
    };
    Ok(Json(run_batch(engine, units).await))
}

// --- helpers ---
fn reject(e: EngineError) -> (StatusCode, String) {
    match e {
        EngineError::NotFound { .. } => e404(e.to_string()),
        EngineError::InvalidInput(_) => e400(e.to_string()),
        EngineError::Conflict { .. } => (StatusCode::CONFLICT, e.to_string()),
        other => e500(other),
    }
}

fn e400<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e404<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
