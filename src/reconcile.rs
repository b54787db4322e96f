//! Snapshot reconciliation and the triggers that drive it.
//!
//! One reconcile handles a single (student, course) pair: build a fresh tree
//! from facts, overlay it on the persisted snapshot, re-derive, persist under
//! an optimistic version check and refresh both read models. Running it twice
//! over the same facts writes nothing the second time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

use crate::builder::{build_tree, derive};
use crate::clock::Clock;
use crate::competency::{plan_automatic, plan_mark};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::facts::{load_precourse, CourseFacts, PrecourseAttempts};
use crate::models::{ActivityLog, Competency, Id, MarkCompetencyReq, MarkNodeReq, NodeRef};
use crate::percentage::{summarize, Percentage};
use crate::projection::{admin_report, training_plan};
use crate::snapshot::{canon, merge, parse_details, CourseDetails};
use crate::store::{ProgressStore, SaveOutcome};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Recompute,
    AttemptSubmitted,
    EnrollmentCreated,
    CompetencyMarked,
    NodeMarked,
    Batch,
}

/// Threaded through every engine call. Nested calls inherit the trigger but
/// never write activity records of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub suppress_side_effects: bool,
    pub trigger: Trigger,
}

impl CallContext {
    pub fn new(trigger: Trigger) -> Self {
        Self { suppress_side_effects: false, trigger }
    }

    pub fn quiet(trigger: Trigger) -> Self {
        Self { suppress_side_effects: true, trigger }
    }

    pub fn nested(&self) -> Self {
        Self { suppress_side_effects: true, trigger: self.trigger }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reconciled {
    Updated { version: i64, percentage: Percentage },
    Unchanged { version: i64, percentage: Percentage },
    /// The enrollment is gone; snapshot and read models were deleted.
    Removed,
}

/// Result of one course inside a multi-course trigger.
#[derive(Serialize, Debug, Clone)]
pub struct CourseOutcome {
    pub course_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<Reconciled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
}

impl CourseOutcome {
    fn from_result(course_id: Id, result: Result<Reconciled>) -> Self {
        match result {
            Ok(reconciled) => CourseOutcome { course_id, reconciled: Some(reconciled), error: None, retryable: false },
            Err(e) => CourseOutcome { course_id, reconciled: None, retryable: e.is_retryable(), error: Some(e.to_string()) },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Engine<S> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl<S: ProgressStore> Engine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config: Arc::new(config), clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recompute one (student, course) pair.
    pub async fn recompute_course(&self, ctx: &CallContext, student_id: Id, course_id: Id) -> Result<Reconciled> {
        let precourse = load_precourse(self.store.as_ref(), student_id, &self.config).await?;
        self.reconcile(ctx, student_id, course_id, &precourse, None)
            .instrument(tracing::info_span!("reconcile", student_id, course_id))
            .await
    }

    /// Every enrolled course plus both pre-course pseudo-courses. A failing
    /// course is logged and reported; the others still run.
    pub async fn recompute_student(&self, ctx: &CallContext, student_id: Id) -> Result<Vec<CourseOutcome>> {
        let mut courses: Vec<Id> = self.store.enrollments(student_id).await?.iter().map(|e| e.course_id).collect();
        for assessment in [self.config.legacy_precourse, self.config.current_precourse] {
            if self.store.course(assessment.course_id).await?.is_some() {
                courses.push(assessment.course_id);
            }
        }
        courses.sort_unstable();
        courses.dedup();
        self.recompute_many(ctx, student_id, courses).await
    }

    /// Recompute the attempt's course. A pre-course attempt also refreshes
    /// every main course, since their first topic mirrors its result.
    pub async fn on_attempt_submitted(&self, ctx: &CallContext, student_id: Id, attempt_id: Id) -> Result<Vec<CourseOutcome>> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| EngineError::not_found("attempt", attempt_id))?;
        if attempt.user_id != student_id {
            return Err(EngineError::InvalidInput(format!(
                "attempt {attempt_id} belongs to student {}, not {student_id}",
                attempt.user_id
            )));
        }

        let mut courses = vec![attempt.course_id];
        if self.config.is_precourse_quiz(attempt.quiz_id) || self.config.is_precourse(attempt.course_id) {
            for enrollment in self.store.enrollments(student_id).await? {
                if let Some(course) = self.store.course(enrollment.course_id).await? {
                    if self.config.takes_precourse(&course) {
                        courses.push(course.id);
                    }
                }
            }
            tracing::info!(student_id, attempt_id, courses = courses.len(), "pre-course attempt; refreshing main courses");
        }
        courses.sort_unstable();
        courses.dedup();
        self.recompute_many(ctx, student_id, courses).await
    }

    pub async fn on_enrollment_created(&self, ctx: &CallContext, student_id: Id, course_id: Id) -> Result<Reconciled> {
        if self.store.enrollment(student_id, course_id).await?.is_none() {
            return Err(EngineError::not_found("enrollment", course_id));
        }
        self.recompute_course(ctx, student_id, course_id).await
    }

    /// Authorized competency mark. Returns the stored record, or `None` when
    /// the lesson was already competent and the mark was not forced.
    pub async fn mark_competent(
        &self,
        ctx: &CallContext,
        student_id: Id,
        lesson_id: Id,
        req: &MarkCompetencyReq,
    ) -> Result<Option<Competency>> {
        let lesson = self
            .store
            .lesson(lesson_id)
            .await?
            .ok_or_else(|| EngineError::not_found("lesson", lesson_id))?;
        let precourse = load_precourse(self.store.as_ref(), student_id, &self.config).await?;
        let facts = CourseFacts::load(self.store.as_ref(), student_id, lesson.course_id, precourse.clone()).await?;
        let now = self.clock.now();
        let Some(record) = plan_mark(&facts, lesson_id, req, now) else {
            tracing::debug!(student_id, lesson_id, "already competent; mark ignored");
            return Ok(None);
        };
        let saved = self.store.upsert_competency(record).await?;
        tracing::info!(student_id, lesson_id, forced = req.force, "competency marked");

        self.reconcile(&ctx.nested(), student_id, lesson.course_id, &precourse, None)
            .instrument(tracing::info_span!("reconcile", student_id, course_id = lesson.course_id))
            .await?;
        if !ctx.suppress_side_effects {
            self.store
                .record_activity(ActivityLog {
                    user_id: student_id,
                    course_id: Some(lesson.course_id),
                    action: "competency_marked".into(),
                    detail: serde_json::json!({ "lesson_id": lesson_id, "forced": req.force, "marked_by": req.marked_by }),
                    at: now,
                })
                .await?;
        }
        Ok(Some(saved))
    }

    /// Write a manual completion mark on a lesson or topic and reconcile.
    pub async fn mark_node_complete(
        &self,
        ctx: &CallContext,
        student_id: Id,
        course_id: Id,
        req: &MarkNodeReq,
    ) -> Result<Reconciled> {
        let precourse = load_precourse(self.store.as_ref(), student_id, &self.config).await?;
        let at = req.at.unwrap_or_else(|| self.clock.now());
        self.reconcile(ctx, student_id, course_id, &precourse, Some((req.node, at)))
            .instrument(tracing::info_span!("reconcile", student_id, course_id))
            .await
    }

    async fn recompute_many(&self, ctx: &CallContext, student_id: Id, courses: Vec<Id>) -> Result<Vec<CourseOutcome>> {
        let precourse = load_precourse(self.store.as_ref(), student_id, &self.config).await?;
        let mut outcomes = Vec::with_capacity(courses.len());
        for course_id in courses {
            let result = self
                .reconcile(ctx, student_id, course_id, &precourse, None)
                .instrument(tracing::info_span!("reconcile", student_id, course_id))
                .await;
            if let Err(e) = &result {
                tracing::error!(student_id, course_id, error = %e, "course reconcile failed; continuing");
            }
            outcomes.push(CourseOutcome::from_result(course_id, result));
        }
        Ok(outcomes)
    }

    async fn reconcile(
        &self,
        ctx: &CallContext,
        student_id: Id,
        course_id: Id,
        precourse: &PrecourseAttempts,
        mark: Option<(NodeRef, DateTime<Utc>)>,
    ) -> Result<Reconciled> {
        let store = self.store.as_ref();
        let config = self.config.as_ref();

        if !config.is_precourse(course_id) && store.enrollment(student_id, course_id).await?.is_none() {
            let existed = store.delete_progress(student_id, course_id).await?;
            store.delete_training_plan(student_id, course_id).await?;
            store.delete_admin_report(student_id, course_id).await?;
            if existed {
                tracing::info!("enrollment missing; snapshot removed");
            }
            return Ok(Reconciled::Removed);
        }

        let now = self.clock.now();
        let mut facts = CourseFacts::load(store, student_id, course_id, precourse.clone()).await?;
        if let Some((node, _)) = mark {
            ensure_node(&facts, node)?;
        }
        let mut fresh = with_mark(build_tree(&facts, config), mark, &facts, config);
        let mut competency_checked = false;
        let mut conflicts = 0;

        loop {
            let stored = store.load_progress(student_id, course_id).await?;
            let existing = stored.as_ref().and_then(|p| match parse_details(&p.details) {
                Ok(details) if details.course == course_id => Some(details),
                Ok(details) => {
                    tracing::warn!(found = details.course, "snapshot belongs to another course; recomputing fresh");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed snapshot; recomputing fresh");
                    None
                }
            });
            let details = match &existing {
                Some(old) => derive(merge(old, &fresh), &facts, config),
                None => fresh.clone(),
            };

            if !competency_checked {
                competency_checked = true;
                let planned: Vec<_> = facts
                    .catalog
                    .lessons
                    .iter()
                    .filter_map(|l| plan_automatic(&facts, &details, l.id, now))
                    .collect();
                if !planned.is_empty() {
                    for record in planned {
                        let lesson_id = record.lesson_id;
                        store.upsert_competency(record).await?;
                        tracing::info!(lesson_id, "lesson evaluated competent");
                    }
                    facts.competencies = store.competencies(student_id, course_id).await?;
                    fresh = with_mark(build_tree(&facts, config), mark, &facts, config);
                    continue;
                }
            }

            let percentage = summarize(&details, &facts, config, now);
            let details_json = serde_json::to_value(&details)?;
            let percentage_json = serde_json::to_value(percentage)?;

            let version = match &stored {
                Some(p) if existing.is_some() && p.details == details_json && p.percentage == percentage_json => {
                    self.project(&facts, &details, &percentage, now).await?;
                    return Ok(Reconciled::Unchanged { version: p.version, percentage });
                }
                Some(p) => Some(p.version),
                None => None,
            };

            match store
                .save_progress(student_id, course_id, version, &percentage_json, &details_json)
                .await?
            {
                SaveOutcome::Saved { version } => {
                    self.project(&facts, &details, &percentage, now).await?;
                    if !ctx.suppress_side_effects {
                        store
                            .record_activity(ActivityLog {
                                user_id: student_id,
                                course_id: Some(course_id),
                                action: "progress_recomputed".into(),
                                detail: serde_json::json!({
                                    "trigger": ctx.trigger,
                                    "version": version,
                                    "actual": percentage.actual,
                                }),
                                at: now,
                            })
                            .await?;
                    }
                    tracing::debug!(version, actual = percentage.actual, "snapshot saved");
                    return Ok(Reconciled::Updated { version, percentage });
                }
                SaveOutcome::Conflict => {
                    conflicts += 1;
                    tracing::debug!(conflicts, "snapshot changed underneath; retrying");
                    if conflicts > config.save_retries {
                        return Err(EngineError::Conflict { student_id, course_id });
                    }
                }
            }
        }
    }

    async fn project(&self, facts: &CourseFacts, details: &CourseDetails, percentage: &Percentage, now: DateTime<Utc>) -> Result<()> {
        let config = self.config.as_ref();
        let plan = training_plan(facts, details, percentage, config, now);
        self.store.save_training_plan(&plan).await?;
        if let Some(row) = admin_report(facts, details, percentage, config, now) {
            self.store.save_admin_report(&row).await?;
        }
        Ok(())
    }
}

fn ensure_node(facts: &CourseFacts, node: NodeRef) -> Result<()> {
    let known = match node {
        NodeRef::Lesson(id) => facts.catalog.lesson(id).is_some(),
        NodeRef::Topic(id) => facts.catalog.topics.values().flatten().any(|t| t.id == id),
    };
    if known {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!("{node:?} is not part of course {}", facts.course_id())))
    }
}

/// Stamp `marked_at` on the referenced node of a fresh tree and re-derive.
fn with_mark(
    details: CourseDetails,
    mark: Option<(NodeRef, DateTime<Utc>)>,
    facts: &CourseFacts,
    config: &EngineConfig,
) -> CourseDetails {
    let Some((node, at)) = mark else {
        return details;
    };
    let at = canon(Some(at));
    let mut details = details;
    match node {
        NodeRef::Lesson(lesson_id) => {
            if let Some(lesson) = details.lessons.list.get_mut(&lesson_id) {
                lesson.marked_at = at;
            }
        }
        NodeRef::Topic(topic_id) => {
            for lesson in details.lessons.list.values_mut() {
                if let Some(topic) = lesson.topics.list.get_mut(&topic_id) {
                    topic.marked_at = at;
                }
            }
        }
    }
    derive(details, facts, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_context_suppresses_side_effects() {
        let ctx = CallContext::new(Trigger::CompetencyMarked);
        assert!(!ctx.suppress_side_effects);
        let inner = ctx.nested();
        assert!(inner.suppress_side_effects);
        assert_eq!(inner.trigger, Trigger::CompetencyMarked);
    }

    #[test]
    fn failed_outcome_keeps_retryability() {
        let outcome = CourseOutcome::from_result(3, Err(EngineError::Timeout { seconds: 5 }));
        assert!(!outcome.is_ok());
        assert!(outcome.retryable);
        let ok = CourseOutcome::from_result(4, Ok(Reconciled::Removed));
        assert!(ok.is_ok());
        assert_eq!(serde_json::to_value(&ok).unwrap()["reconciled"]["result"], "removed");
    }
}
