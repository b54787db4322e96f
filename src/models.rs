use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Course {
    pub id: Id,
    pub title: String,
    pub category_id: Option<Id>,
    pub is_main_course: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lesson {
    pub id: Id,
    pub course_id: Id,
    pub title: String,
    pub order: i32,
    pub has_work_placement: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Topic {
    pub id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub title: String,
    pub order: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Quiz {
    pub id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub topic_id: Id,
    pub title: String,
    pub order: i32,
    pub has_checklist: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Attempting,
    Submitted,
    Satisfactory,
    Fail,
    Returned,
    Reviewing,
    Overdue,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Attempting => "ATTEMPTING",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Satisfactory => "SATISFACTORY",
            AttemptStatus::Fail => "FAIL",
            AttemptStatus::Returned => "RETURNED",
            AttemptStatus::Reviewing => "REVIEWING",
            AttemptStatus::Overdue => "OVERDUE",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AttemptStatus::Fail | AttemptStatus::Returned)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemResult {
    #[serde(rename = "INPROGRESS")]
    InProgress,
    Completed,
    Evaluated,
    Marked,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizAttempt {
    pub id: Id,
    pub user_id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub topic_id: Id,
    pub quiz_id: Id,
    pub attempt: i32,
    pub status: AttemptStatus,
    pub system_result: SystemResult,
    pub submitted_at: Option<DateTime<Utc>>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QuizAttempt {
    /// Submitted, evaluated, marked or already judged satisfactory.
    pub fn is_qualifying(&self) -> bool {
        self.submitted_at.is_some()
            || matches!(
                self.system_result,
                SystemResult::Completed | SystemResult::Evaluated | SystemResult::Marked
            )
            || self.status == AttemptStatus::Satisfactory
    }

    /// Best timestamp describing when the student last touched this attempt.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.submitted_at.or(self.accessed_at).unwrap_or(self.updated_at)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Competency {
    pub id: Id,
    pub user_id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub is_competent: bool,
    pub competent_on: Option<DateTime<Utc>>,
    pub course_start: Option<NaiveDate>,
    pub lesson_start: Option<NaiveDate>,
    pub lesson_end: Option<NaiveDate>,
    pub notes: Option<String>,
    pub param: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewCompetency {
    pub user_id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub competent_on: DateTime<Utc>,
    pub course_start: Option<NaiveDate>,
    pub lesson_start: Option<NaiveDate>,
    pub lesson_end: Option<NaiveDate>,
    pub notes: Option<String>,
    pub param: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Enrolled,
    Completed,
    Delist,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id: Id,
    pub user_id: Id,
    pub course_id: Id,
    pub status: EnrollmentStatus,
    pub course_start_at: Option<DateTime<Utc>>,
    pub course_ends_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status != EnrollmentStatus::Delist
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Attachable {
    Quiz(Id),
    Lesson(Id),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityEvent {
    Checklist,
    WorkPlacement,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistStatus {
    #[serde(rename = "SATISFACTORY")]
    Satisfactory,
    #[serde(rename = "NOT SATISFACTORY")]
    NotSatisfactory,
}

/// Append-only checklist / work-placement record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentActivity {
    pub id: Id,
    pub user_id: Id,
    pub event: ActivityEvent,
    pub attachable: Attachable,
    pub status: Option<ChecklistStatus>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonUnlock {
    pub user_id: Id,
    pub course_id: Id,
    pub lesson_id: Id,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Student {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: Option<String>,
    pub leader: Option<String>,
    pub trainer: Option<String>,
    pub onboarded_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Side-effect record written by the engine itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActivityLog {
    pub user_id: Id,
    pub course_id: Option<Id>,
    pub action: String,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MarkCompetencyReq {
    pub remarks: String,
    pub lesson_end: NaiveDate,
    pub lesson_start: Option<NaiveDate>,
    #[serde(default)]
    pub force: bool,
    /// Staff member recording the mark, when known.
    pub marked_by: Option<Id>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeRef {
    Lesson(Id),
    Topic(Id),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MarkNodeReq {
    pub node: NodeRef,
    pub at: Option<DateTime<Utc>>,
}
