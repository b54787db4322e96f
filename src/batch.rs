//! Report batch runner. Each (student, course) unit runs in its own task
//! under a timeout; a failing or panicking unit is recorded and the batch
//! carries on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::Id;
use crate::reconcile::{CallContext, Engine, Reconciled, Trigger};
use crate::store::ProgressStore;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BatchUnit {
    pub student_id: Id,
    pub course_id: Id,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub unit: BatchUnit,
    pub message: String,
    pub retryable: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub succeeded: Vec<BatchUnit>,
    pub removed: Vec<BatchUnit>,
    pub failed: Vec<UnitFailure>,
}

impl BatchOutcome {
    pub fn retryable(&self) -> impl Iterator<Item = &BatchUnit> {
        self.failed.iter().filter(|f| f.retryable).map(|f| &f.unit)
    }
}

/// Every enrollment that is not delisted.
pub async fn active_units<S: ProgressStore + ?Sized>(store: &S) -> Result<Vec<BatchUnit>> {
    let mut units: Vec<BatchUnit> = store
        .all_enrollments()
        .await?
        .into_iter()
        .filter(|e| e.is_active())
        .map(|e| BatchUnit { student_id: e.user_id, course_id: e.course_id })
        .collect();
    units.sort();
    Ok(units)
}

pub async fn run_batch<S>(engine: Arc<Engine<S>>, units: Vec<BatchUnit>) -> BatchOutcome
where
    S: ProgressStore + 'static,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("batch", %run_id, units = units.len());
    async move {
        let config = engine.config();
        let limit = Arc::new(Semaphore::new(config.batch_concurrency));
        let timeout = config.batch_unit_timeout;

        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            let engine = engine.clone();
            let limit = limit.clone();
            let handle = tokio::spawn(
                async move {
                    let _permit = limit.acquire_owned().await.map_err(|e| EngineError::InvalidInput(e.to_string()))?;
                    let ctx = CallContext::quiet(Trigger::Batch);
                    match tokio::time::timeout(timeout, engine.recompute_course(&ctx, unit.student_id, unit.course_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout { seconds: timeout.as_secs() }),
                    }
                }
                .in_current_span(),
            );
            handles.push((unit, handle));
        }

        let mut outcome = BatchOutcome { run_id, succeeded: Vec::new(), removed: Vec::new(), failed: Vec::new() };
        for (unit, handle) in handles {
            match handle.await {
                Ok(Ok(Reconciled::Removed)) => outcome.removed.push(unit),
                Ok(Ok(_)) => outcome.succeeded.push(unit),
                Ok(Err(e)) => {
                    tracing::error!(student_id = unit.student_id, course_id = unit.course_id, error = %e, "batch unit failed");
                    outcome.failed.push(UnitFailure { unit, message: e.to_string(), retryable: e.is_retryable() });
                }
                Err(e) => {
                    tracing::error!(student_id = unit.student_id, course_id = unit.course_id, error = %e, "batch unit aborted");
                    outcome.failed.push(UnitFailure { unit, message: e.to_string(), retryable: true });
                }
            }
        }
        tracing::info!(
            succeeded = outcome.succeeded.len(),
            removed = outcome.removed.len(),
            failed = outcome.failed.len(),
            "batch finished"
        );
        outcome
    }
    .instrument(span)
    .await
}
