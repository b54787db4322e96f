// Read models derived from a reconciled snapshot: the per-student training
// plan and the flat admin report row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::competency::{evaluate, Readiness};
use crate::config::EngineConfig;
use crate::facts::CourseFacts;
use crate::models::{ChecklistStatus, EnrollmentStatus, Id};
use crate::percentage::{report_status, Percentage, ReportStatus};
use crate::snapshot::{CourseDetails, LessonNode, QuizNode, TopicNode};
use crate::status::{course_status, lesson_status, quiz_status, topic_status, NodeStatus};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub user_id: Id,
    pub course: CoursePlan,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoursePlan {
    pub id: Id,
    pub title: String,
    pub status: NodeStatus,
    pub report_status: ReportStatus,
    pub percentage: f64,
    pub expected: f64,
    pub is_main: bool,
    pub course_start_at: Option<DateTime<Utc>>,
    pub course_ends_at: Option<DateTime<Utc>>,
    pub lessons: Vec<LessonPlan>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonPlan {
    pub id: Id,
    pub title: String,
    pub order: i32,
    pub status: NodeStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub marked_at: Option<DateTime<Utc>>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub lesson_end_at: Option<DateTime<Utc>>,
    pub has_work_placement: bool,
    pub work_placement_at: Option<DateTime<Utc>>,
    pub competency: CompetencyBadge,
    pub topics: Vec<TopicPlan>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompetencyBadge {
    pub state: String,
    pub competent_on: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TopicPlan {
    pub id: Id,
    pub title: String,
    pub order: i32,
    pub status: NodeStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub marked_at: Option<DateTime<Utc>>,
    pub quizzes: Vec<QuizPlan>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizPlan {
    pub id: Id,
    pub title: String,
    pub order: i32,
    pub status: NodeStatus,
    pub attempts: usize,
    pub passed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub has_checklist: bool,
    pub checklist: Option<ChecklistStatus>,
}

pub fn training_plan(
    facts: &CourseFacts,
    details: &CourseDetails,
    percentage: &Percentage,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> TrainingPlan {
    let catalog = &facts.catalog;
    let enrollment = facts.enrollment.as_ref();
    let lessons = catalog
        .lessons
        .iter()
        .map(|lesson| {
            let node = details.lessons.list.get(&lesson.id).cloned().unwrap_or_default();
            let topics = catalog
                .topics_of(lesson.id)
                .iter()
                .map(|topic| {
                    let tnode = node.topics.list.get(&topic.id).cloned().unwrap_or_default();
                    let quizzes = catalog
                        .quizzes_of(topic.id)
                        .iter()
                        .map(|quiz| {
                            let qnode = tnode.quizzes.list.get(&quiz.id).cloned().unwrap_or_default();
                            quiz_plan(facts, quiz.id, &quiz.title, quiz.order, quiz.has_checklist, &qnode)
                        })
                        .collect();
                    topic_plan(topic.id, &topic.title, topic.order, &tnode, quizzes)
                })
                .collect();
            LessonPlan {
                id: lesson.id,
                title: lesson.title.clone(),
                order: lesson.order,
                status: lesson_status(&node),
                completed_at: node.completed_at,
                submitted_at: node.submitted_at,
                marked_at: node.marked_at,
                unlocked_at: facts.unlock(lesson.id).map(|u| u.unlocked_at),
                lesson_end_at: node.lesson_end_at,
                has_work_placement: lesson.has_work_placement,
                work_placement_at: facts.activities.work_placement(lesson.id).map(|a| a.created_at),
                competency: badge(facts, details, lesson.id, &node),
                topics,
            }
        })
        .collect();

    TrainingPlan {
        user_id: facts.student_id,
        course: CoursePlan {
            id: catalog.course.id,
            title: catalog.course.title.clone(),
            status: course_status(details),
            report_status: report_status(percentage, enrollment, now, config.behind_schedule_gap),
            percentage: percentage.actual,
            expected: percentage.expected,
            is_main: config.is_main(&catalog.course),
            course_start_at: enrollment.and_then(|e| e.course_start_at),
            course_ends_at: enrollment.and_then(|e| e.course_ends_at),
            lessons,
        },
    }
}

fn topic_plan(id: Id, title: &str, order: i32, node: &TopicNode, quizzes: Vec<QuizPlan>) -> TopicPlan {
    TopicPlan {
        id,
        title: title.to_string(),
        order,
        status: topic_status(node),
        completed_at: node.completed_at,
        marked_at: node.marked_at,
        quizzes,
    }
}

fn quiz_plan(facts: &CourseFacts, id: Id, title: &str, order: i32, has_checklist: bool, node: &QuizNode) -> QuizPlan {
    QuizPlan {
        id,
        title: title.to_string(),
        order,
        status: quiz_status(node),
        attempts: facts.attempts_for(id).count(),
        passed_at: node.passed_at,
        failed_at: node.failed_at,
        submitted_at: node.submitted_at,
        has_checklist,
        checklist: if has_checklist { facts.activities.checklist_status(id) } else { None },
    }
}

fn badge(facts: &CourseFacts, details: &CourseDetails, lesson_id: Id, node: &LessonNode) -> CompetencyBadge {
    let record = facts.competency(lesson_id);
    let state = match evaluate(facts, details, lesson_id) {
        Readiness::Competent => "COMPETENT",
        Readiness::Ready => "READY",
        Readiness::NotReady(_) if lesson_status(node).is_processed() => "IN PROGRESS",
        Readiness::NotReady(_) => "NOT STARTED",
    };
    CompetencyBadge {
        state: state.to_string(),
        competent_on: record.filter(|c| c.is_competent).and_then(|c| c.competent_on),
        notes: record.and_then(|c| c.notes.clone()),
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AdminReport {
    pub user_id: Id,
    pub course_id: Id,
    pub student_name: String,
    pub email: String,
    pub company: Option<String>,
    pub leader: Option<String>,
    pub trainer: Option<String>,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub course_title: String,
    pub enrollment_status: Option<EnrollmentStatus>,
    pub course_status: ReportStatus,
    pub course_start_at: Option<DateTime<Utc>>,
    pub course_ends_at: Option<DateTime<Utc>>,
    pub percentage: f64,
    pub expected: f64,
    pub lessons_total: usize,
    pub lessons_completed: usize,
    pub quizzes_total: usize,
    pub quizzes_passed: usize,
    pub quizzes_pending: usize,
    pub quizzes_failed: usize,
    pub competencies: usize,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Report row for real courses; the pre-course pseudo-courses have none.
pub fn admin_report(
    facts: &CourseFacts,
    details: &CourseDetails,
    percentage: &Percentage,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Option<AdminReport> {
    if config.is_precourse(facts.course_id()) {
        return None;
    }
    let enrollment = facts.enrollment.as_ref();
    let student = facts.student.as_ref();
    let counts = &percentage.counts;
    Some(AdminReport {
        user_id: facts.student_id,
        course_id: facts.course_id(),
        student_name: student.map(|s| s.display_name()).unwrap_or_default(),
        email: student.map(|s| s.email.clone()).unwrap_or_default(),
        company: student.and_then(|s| s.company.clone()),
        leader: student.and_then(|s| s.leader.clone()),
        trainer: student.and_then(|s| s.trainer.clone()),
        onboarded_at: student.and_then(|s| s.onboarded_at),
        course_title: facts.catalog.course.title.clone(),
        enrollment_status: enrollment.map(|e| e.status),
        course_status: report_status(percentage, enrollment, now, config.behind_schedule_gap),
        course_start_at: enrollment.and_then(|e| e.course_start_at),
        course_ends_at: enrollment.and_then(|e| e.course_ends_at),
        percentage: percentage.actual,
        expected: percentage.expected,
        lessons_total: counts.lessons,
        lessons_completed: counts.lessons_completed,
        quizzes_total: counts.quizzes,
        quizzes_passed: counts.quizzes_passed,
        quizzes_pending: counts.quizzes_pending,
        quizzes_failed: counts.quizzes_failed,
        competencies: facts.competencies.iter().filter(|c| c.is_competent).count(),
        last_active_at: details.lessons.list.values().filter_map(|l| l.at).max(),
    })
}
