use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::facts::FactStore;
use crate::models::{ActivityLog, Competency, Id, NewCompetency};
use crate::projection::{AdminReport, TrainingPlan};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// A persisted `CourseProgress` row. Documents stay raw JSON here so a
/// malformed snapshot can be detected and recomputed by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProgress {
    pub version: i64,
    pub percentage: Value,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: i64 },
    /// Another writer saved since the snapshot was read.
    Conflict,
}

#[async_trait]
pub trait ProgressStore: FactStore {
    async fn load_progress(&self, user_id: Id, course_id: Id) -> Result<Option<StoredProgress>>;

    /// Conditional write. `expected_version` of `None` only succeeds when
    /// no row exists yet.
    async fn save_progress(
        &self,
        user_id: Id,
        course_id: Id,
        expected_version: Option<i64>,
        percentage: &Value,
        details: &Value,
    ) -> Result<SaveOutcome>;

    async fn delete_progress(&self, user_id: Id, course_id: Id) -> Result<bool>;

    /// Insert or replace the single competency row for (user, lesson).
    async fn upsert_competency(&self, record: NewCompetency) -> Result<Competency>;

    async fn save_training_plan(&self, plan: &TrainingPlan) -> Result<()>;
    async fn load_training_plan(&self, user_id: Id, course_id: Id) -> Result<Option<TrainingPlan>>;
    async fn delete_training_plan(&self, user_id: Id, course_id: Id) -> Result<()>;

    async fn save_admin_report(&self, row: &AdminReport) -> Result<()>;
    async fn delete_admin_report(&self, user_id: Id, course_id: Id) -> Result<()>;

    async fn record_activity(&self, entry: ActivityLog) -> Result<()>;
}
