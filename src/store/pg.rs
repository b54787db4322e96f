use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::types::Json;

use super::{ProgressStore, SaveOutcome, StoredProgress};
use crate::db::Db;
use crate::error::Result;
use crate::facts::FactStore;
use crate::models::*;
use crate::projection::{AdminReport, TrainingPlan};
use crate::status::{
    normalize_attempt_status, normalize_checklist_status, normalize_enrollment_status, normalize_system_result,
};

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

// --- rows ---

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: i64,
    title: String,
    category_id: Option<i64>,
    is_main_course: bool,
}

impl From<CourseRow> for Course {
    fn from(r: CourseRow) -> Self {
        Course { id: r.id, title: r.title, category_id: r.category_id, is_main_course: r.is_main_course }
    }
}

#[derive(sqlx::FromRow)]
struct LessonRow {
    id: i64,
    course_id: i64,
    title: String,
    lesson_order: i32,
    has_work_placement: bool,
}

impl From<LessonRow> for Lesson {
    fn from(r: LessonRow) -> Self {
        Lesson {
            id: r.id,
            course_id: r.course_id,
            title: r.title,
            order: r.lesson_order,
            has_work_placement: r.has_work_placement,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TopicRow {
    id: i64,
    course_id: i64,
    lesson_id: i64,
    title: String,
    topic_order: i32,
}

#[derive(sqlx::FromRow)]
struct QuizRow {
    id: i64,
    course_id: i64,
    lesson_id: i64,
    topic_id: i64,
    title: String,
    quiz_order: i32,
    has_checklist: bool,
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: i64,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
    topic_id: i64,
    quiz_id: i64,
    attempt: i32,
    status: String,
    system_result: String,
    submitted_at: Option<DateTime<Utc>>,
    accessed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<AttemptRow> for QuizAttempt {
    fn from(r: AttemptRow) -> Self {
        let status = normalize_attempt_status(&r.status).unwrap_or_else(|| {
            tracing::warn!(attempt_id = r.id, status = %r.status, "unknown attempt status; treated as ATTEMPTING");
            AttemptStatus::Attempting
        });
        let system_result = normalize_system_result(&r.system_result).unwrap_or(SystemResult::InProgress);
        QuizAttempt {
            id: r.id,
            user_id: r.user_id,
            course_id: r.course_id,
            lesson_id: r.lesson_id,
            topic_id: r.topic_id,
            quiz_id: r.quiz_id,
            attempt: r.attempt,
            status,
            system_result,
            submitted_at: r.submitted_at,
            accessed_at: r.accessed_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CompetencyRow {
    id: i64,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
    is_competent: bool,
    competent_on: Option<DateTime<Utc>>,
    course_start: Option<NaiveDate>,
    lesson_start: Option<NaiveDate>,
    lesson_end: Option<NaiveDate>,
    notes: Option<String>,
    param: Option<Value>,
}

impl From<CompetencyRow> for Competency {
    fn from(r: CompetencyRow) -> Self {
        Competency {
            id: r.id,
            user_id: r.user_id,
            course_id: r.course_id,
            lesson_id: r.lesson_id,
            is_competent: r.is_competent,
            competent_on: r.competent_on,
            course_start: r.course_start,
            lesson_start: r.lesson_start,
            lesson_end: r.lesson_end,
            notes: r.notes,
            param: r.param,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: i64,
    user_id: i64,
    event: String,
    attachable_type: String,
    attachable_id: i64,
    status: Option<String>,
    created_at: DateTime<Utc>,
}

impl ActivityRow {
    fn into_activity(self) -> Option<StudentActivity> {
        let event = match self.event.as_str() {
            "CHECKLIST" => ActivityEvent::Checklist,
            "WORK_PLACEMENT" => ActivityEvent::WorkPlacement,
            other => {
                tracing::debug!(id = self.id, event = other, "unrelated activity event skipped");
                return None;
            }
        };
        let attachable = match self.attachable_type.to_ascii_lowercase().as_str() {
            "quiz" => Attachable::Quiz(self.attachable_id),
            "lesson" => Attachable::Lesson(self.attachable_id),
            other => {
                tracing::warn!(id = self.id, kind = other, "activity attached to unknown kind skipped");
                return None;
            }
        };
        Some(StudentActivity {
            id: self.id,
            user_id: self.user_id,
            event,
            attachable,
            status: self.status.as_deref().and_then(normalize_checklist_status),
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: i64,
    user_id: i64,
    course_id: i64,
    status: String,
    course_start_at: Option<DateTime<Utc>>,
    course_ends_at: Option<DateTime<Utc>>,
}

impl From<EnrollmentRow> for Enrollment {
    fn from(r: EnrollmentRow) -> Self {
        Enrollment {
            id: r.id,
            user_id: r.user_id,
            course_id: r.course_id,
            status: normalize_enrollment_status(&r.status),
            course_start_at: r.course_start_at,
            course_ends_at: r.course_ends_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StudentRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    company: Option<String>,
    leader: Option<String>,
    trainer: Option<String>,
    onboarded_at: Option<DateTime<Utc>>,
}

impl From<StudentRow> for Student {
    fn from(r: StudentRow) -> Self {
        Student {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            company: r.company,
            leader: r.leader,
            trainer: r.trainer,
            onboarded_at: r.onboarded_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    version: i64,
    percentage: Value,
    details: Value,
}

const ATTEMPT_COLUMNS: &str = "id, user_id, course_id, lesson_id, topic_id, quiz_id, attempt, status, \
     system_result, submitted_at, accessed_at, updated_at";
const ENROLLMENT_COLUMNS: &str = "id, user_id, course_id, status, course_start_at, course_ends_at";
const COMPETENCY_COLUMNS: &str = "id, user_id, course_id, lesson_id, is_competent, competent_on, \
     course_start, lesson_start, lesson_end, notes, param";

#[async_trait]
impl FactStore for PgStore {
    async fn courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query_as::<_, CourseRow>("SELECT id, title, category_id, is_main_course FROM courses ORDER BY id")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Course::from).collect())
    }

    async fn course(&self, course_id: Id) -> Result<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>("SELECT id, title, category_id, is_main_course FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Course::from))
    }

    async fn lesson(&self, lesson_id: Id) -> Result<Option<Lesson>> {
        let row = sqlx::query_as::<_, LessonRow>(
            "SELECT id, course_id, title, lesson_order, has_work_placement FROM lessons WHERE id = $1",
        )
        .bind(lesson_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Lesson::from))
    }

    async fn lessons(&self, course_id: Id) -> Result<Vec<Lesson>> {
        let rows = sqlx::query_as::<_, LessonRow>(
            "SELECT id, course_id, title, lesson_order, has_work_placement FROM lessons WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Lesson::from).collect())
    }

    async fn topics(&self, course_id: Id) -> Result<Vec<Topic>> {
        let rows = sqlx::query_as::<_, TopicRow>(
            "SELECT id, course_id, lesson_id, title, topic_order FROM topics WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Topic { id: r.id, course_id: r.course_id, lesson_id: r.lesson_id, title: r.title, order: r.topic_order })
            .collect())
    }

    async fn quizzes(&self, course_id: Id) -> Result<Vec<Quiz>> {
        let rows = sqlx::query_as::<_, QuizRow>(
            "SELECT id, course_id, lesson_id, topic_id, title, quiz_order, has_checklist FROM quizzes WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Quiz {
                id: r.id,
                course_id: r.course_id,
                lesson_id: r.lesson_id,
                topic_id: r.topic_id,
                title: r.title,
                order: r.quiz_order,
                has_checklist: r.has_checklist,
            })
            .collect())
    }

    async fn attempt(&self, attempt_id: Id) -> Result<Option<QuizAttempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE id = $1");
        let row = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(attempt_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(QuizAttempt::from))
    }

    async fn course_attempts(&self, user_id: Id, course_id: Id) -> Result<Vec<QuizAttempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE user_id = $1 AND course_id = $2 ORDER BY id");
        let rows = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(QuizAttempt::from).collect())
    }

    async fn quiz_attempts(&self, user_id: Id, quiz_id: Id) -> Result<Vec<QuizAttempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2 ORDER BY id");
        let rows = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(user_id)
            .bind(quiz_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(QuizAttempt::from).collect())
    }

    async fn competencies(&self, user_id: Id, course_id: Id) -> Result<Vec<Competency>> {
        let sql = format!("SELECT {COMPETENCY_COLUMNS} FROM competencies WHERE user_id = $1 AND course_id = $2");
        let rows = sqlx::query_as::<_, CompetencyRow>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Competency::from).collect())
    }

    async fn activities(&self, user_id: Id) -> Result<Vec<StudentActivity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"SELECT id, user_id, event, attachable_type, attachable_id, status, created_at
               FROM student_activities WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().filter_map(ActivityRow::into_activity).collect())
    }

    async fn unlocks(&self, user_id: Id, course_id: Id) -> Result<Vec<LessonUnlock>> {
        let rows: Vec<(i64, i64, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, course_id, lesson_id, unlocked_at FROM lesson_unlocks WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, course_id, lesson_id, unlocked_at)| LessonUnlock { user_id, course_id, lesson_id, unlocked_at })
            .collect())
    }

    async fn enrollment(&self, user_id: Id, course_id: Id) -> Result<Option<Enrollment>> {
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 AND course_id = $2");
        let row = sqlx::query_as::<_, EnrollmentRow>(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Enrollment::from))
    }

    async fn enrollments(&self, user_id: Id) -> Result<Vec<Enrollment>> {
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 ORDER BY course_id");
        let rows = sqlx::query_as::<_, EnrollmentRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Enrollment::from).collect())
    }

    async fn all_enrollments(&self) -> Result<Vec<Enrollment>> {
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments ORDER BY user_id, course_id");
        let rows = sqlx::query_as::<_, EnrollmentRow>(&sql).fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(Enrollment::from).collect())
    }

    async fn student(&self, user_id: Id) -> Result<Option<Student>> {
        let row = sqlx::query_as::<_, StudentRow>(
            "SELECT id, first_name, last_name, email, company, leader, trainer, onboarded_at FROM students WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Student::from))
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn load_progress(&self, user_id: Id, course_id: Id) -> Result<Option<StoredProgress>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT version, percentage, details FROM course_progress WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| StoredProgress { version: r.version, percentage: r.percentage, details: r.details }))
    }

    async fn save_progress(
        &self,
        user_id: Id,
        course_id: Id,
        expected_version: Option<i64>,
        percentage: &Value,
        details: &Value,
    ) -> Result<SaveOutcome> {
        let version: Option<i64> = match expected_version {
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO course_progress (user_id, course_id, version, percentage, details)
                    VALUES ($1, $2, 1, $3, $4)
                    ON CONFLICT (user_id, course_id) DO NOTHING
                    RETURNING version
                    "#,
                )
                .bind(user_id)
                .bind(course_id)
                .bind(percentage.clone())
                .bind(details.clone())
                .fetch_optional(&self.db)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE course_progress
                    SET version = version + 1, percentage = $3, details = $4, updated_at = now()
                    WHERE user_id = $1 AND course_id = $2 AND version = $5
                    RETURNING version
                    "#,
                )
                .bind(user_id)
                .bind(course_id)
                .bind(percentage.clone())
                .bind(details.clone())
                .bind(expected)
                .fetch_optional(&self.db)
                .await?
            }
        };
        Ok(match version {
            Some(version) => SaveOutcome::Saved { version },
            None => SaveOutcome::Conflict,
        })
    }

    async fn delete_progress(&self, user_id: Id, course_id: Id) -> Result<bool> {
        let done = sqlx::query("DELETE FROM course_progress WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn upsert_competency(&self, record: NewCompetency) -> Result<Competency> {
        let sql = format!(
            r#"
            INSERT INTO competencies
                (user_id, course_id, lesson_id, is_competent, competent_on, course_start, lesson_start, lesson_end, notes, param)
            VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, lesson_id) DO UPDATE SET
                course_id = EXCLUDED.course_id,
                is_competent = TRUE,
                competent_on = EXCLUDED.competent_on,
                course_start = EXCLUDED.course_start,
                lesson_start = EXCLUDED.lesson_start,
                lesson_end = EXCLUDED.lesson_end,
                notes = EXCLUDED.notes,
                param = EXCLUDED.param,
                updated_at = now()
            RETURNING {COMPETENCY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CompetencyRow>(&sql)
            .bind(record.user_id)
            .bind(record.course_id)
            .bind(record.lesson_id)
            .bind(record.competent_on)
            .bind(record.course_start)
            .bind(record.lesson_start)
            .bind(record.lesson_end)
            .bind(record.notes)
            .bind(record.param)
            .fetch_one(&self.db)
            .await?;
        Ok(row.into())
    }

    async fn save_training_plan(&self, plan: &TrainingPlan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_plans (user_id, course_id, plan)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, course_id) DO UPDATE SET plan = EXCLUDED.plan, updated_at = now()
            "#,
        )
        .bind(plan.user_id)
        .bind(plan.course.id)
        .bind(Json(plan))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn load_training_plan(&self, user_id: Id, course_id: Id) -> Result<Option<TrainingPlan>> {
        let plan: Option<Json<TrainingPlan>> =
            sqlx::query_scalar("SELECT plan FROM training_plans WHERE user_id = $1 AND course_id = $2")
                .bind(user_id)
                .bind(course_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(plan.map(|Json(plan)| plan))
    }

    async fn delete_training_plan(&self, user_id: Id, course_id: Id) -> Result<()> {
        sqlx::query("DELETE FROM training_plans WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn save_admin_report(&self, row: &AdminReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_reports (user_id, course_id, course_status, percentage, expected, report)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, course_id) DO UPDATE SET
                course_status = EXCLUDED.course_status,
                percentage = EXCLUDED.percentage,
                expected = EXCLUDED.expected,
                report = EXCLUDED.report,
                updated_at = now()
            "#,
        )
        .bind(row.user_id)
        .bind(row.course_id)
        .bind(row.course_status.label())
        .bind(row.percentage)
        .bind(row.expected)
        .bind(Json(row))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn delete_admin_report(&self, user_id: Id, course_id: Id) -> Result<()> {
        sqlx::query("DELETE FROM admin_reports WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn record_activity(&self, entry: ActivityLog) -> Result<()> {
        sqlx::query("INSERT INTO activity_log (user_id, course_id, action, detail, at) VALUES ($1, $2, $3, $4, $5)")
            .bind(entry.user_id)
            .bind(entry.course_id)
            .bind(entry.action)
            .bind(entry.detail)
            .bind(entry.at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
