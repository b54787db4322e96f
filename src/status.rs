// Status derivation for snapshot nodes, plus normalizers for the raw
// status strings stored alongside attempts, enrollments and checklists.

use serde::{Deserialize, Serialize};

use crate::models::{AttemptStatus, ChecklistStatus, EnrollmentStatus, QuizAttempt, SystemResult};
use crate::snapshot::{CourseDetails, LessonNode, QuizNode, TopicNode};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    #[serde(rename = "ATTEMPTING")]
    Attempting,
    #[serde(rename = "SUBMITTED")]
    Submitted,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "SATISFACTORY")]
    Satisfactory,
    #[serde(rename = "NOT SATISFACTORY")]
    NotSatisfactory,
}

impl NodeStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Satisfactory)
    }

    /// Anything past untouched counts towards processed work.
    pub fn is_processed(&self) -> bool {
        !matches!(self, NodeStatus::Attempting)
    }
}

pub fn quiz_status(quiz: &QuizNode) -> NodeStatus {
    if quiz.passed {
        NodeStatus::Satisfactory
    } else if quiz.submitted {
        NodeStatus::Submitted
    } else if quiz.failed {
        NodeStatus::NotSatisfactory
    } else {
        NodeStatus::Attempting
    }
}

pub fn topic_status(topic: &TopicNode) -> NodeStatus {
    container_status(topic.completed, topic.marked_at.is_some(), topic.submitted)
}

pub fn lesson_status(lesson: &LessonNode) -> NodeStatus {
    container_status(lesson.completed, lesson.marked_at.is_some(), lesson.submitted)
}

pub fn course_status(course: &CourseDetails) -> NodeStatus {
    let any_started = course
        .lessons
        .list
        .values()
        .any(|lesson| lesson_status(lesson).is_processed());
    container_status(course.completed, false, any_started)
}

fn container_status(completed: bool, marked: bool, submitted: bool) -> NodeStatus {
    if completed || marked {
        NodeStatus::Completed
    } else if submitted {
        NodeStatus::Submitted
    } else {
        NodeStatus::Attempting
    }
}

/// Latest attempt that was submitted or evaluated; in-progress drafts are ignored.
pub fn latest_qualifying<'a, I>(attempts: I) -> Option<&'a QuizAttempt>
where
    I: IntoIterator<Item = &'a QuizAttempt>,
{
    attempts
        .into_iter()
        .filter(|a| a.is_qualifying())
        .max_by_key(|a| (a.attempt, a.activity_at(), a.id))
}

pub fn normalize_attempt_status(v: &str) -> Option<AttemptStatus> {
    match v.trim().to_ascii_uppercase().as_str() {
        "ATTEMPTING" => Some(AttemptStatus::Attempting),
        "SUBMITTED" => Some(AttemptStatus::Submitted),
        "SATISFACTORY" | "COMPLETED" => Some(AttemptStatus::Satisfactory),
        "FAIL" | "FAILED" | "NOT SATISFACTORY" => Some(AttemptStatus::Fail),
        "RETURNED" => Some(AttemptStatus::Returned),
        "REVIEWING" => Some(AttemptStatus::Reviewing),
        "OVERDUE" => Some(AttemptStatus::Overdue),
        _ => None,
    }
}

pub fn normalize_system_result(v: &str) -> Option<SystemResult> {
    match v.trim().to_ascii_uppercase().as_str() {
        "INPROGRESS" | "IN_PROGRESS" => Some(SystemResult::InProgress),
        "COMPLETED" => Some(SystemResult::Completed),
        "EVALUATED" => Some(SystemResult::Evaluated),
        "MARKED" => Some(SystemResult::Marked),
        _ => None,
    }
}

pub fn normalize_checklist_status(v: &str) -> Option<ChecklistStatus> {
    match v.trim().to_ascii_uppercase().as_str() {
        "SATISFACTORY" => Some(ChecklistStatus::Satisfactory),
        "NOT SATISFACTORY" | "NOT_SATISFACTORY" => Some(ChecklistStatus::NotSatisfactory),
        _ => None,
    }
}

pub fn normalize_enrollment_status(v: &str) -> EnrollmentStatus {
    match v.trim().to_ascii_uppercase().as_str() {
        "DELIST" => EnrollmentStatus::Delist,
        "COMPLETED" => EnrollmentStatus::Completed,
        _ => EnrollmentStatus::Enrolled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::NodeList;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn attempt(id: i64, n: i32, status: AttemptStatus, result: SystemResult, submitted: bool) -> QuizAttempt {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(id);
        QuizAttempt {
            id,
            user_id: 1,
            course_id: 1,
            lesson_id: 1,
            topic_id: 1,
            quiz_id: 1,
            attempt: n,
            status,
            system_result: result,
            submitted_at: submitted.then_some(at),
            accessed_at: Some(at),
            updated_at: at,
        }
    }

    #[test]
    fn quiz_status_prefers_passed_over_submitted() {
        let quiz = QuizNode { passed: true, submitted: true, ..Default::default() };
        assert_eq!(quiz_status(&quiz), NodeStatus::Satisfactory);
        let quiz = QuizNode { submitted: true, ..Default::default() };
        assert_eq!(quiz_status(&quiz), NodeStatus::Submitted);
        let quiz = QuizNode { failed: true, ..Default::default() };
        assert_eq!(quiz_status(&quiz), NodeStatus::NotSatisfactory);
        assert_eq!(quiz_status(&QuizNode::default()), NodeStatus::Attempting);
    }

    #[test]
    fn manual_mark_completes_a_container() {
        let topic = TopicNode { marked_at: Some(Utc::now()), ..Default::default() };
        assert_eq!(topic_status(&topic), NodeStatus::Completed);
        let lesson = LessonNode { submitted: true, ..Default::default() };
        assert_eq!(lesson_status(&lesson), NodeStatus::Submitted);
    }

    #[test]
    fn course_is_submitted_once_any_lesson_started() {
        let mut lessons = BTreeMap::new();
        lessons.insert(1, LessonNode::default());
        lessons.insert(2, LessonNode { submitted: true, ..Default::default() });
        let course = CourseDetails { course: 5, completed: false, lessons: NodeList::from_map(lessons) };
        assert_eq!(course_status(&course), NodeStatus::Submitted);
    }

    #[test]
    fn latest_qualifying_skips_drafts() {
        let attempts = vec![
            attempt(1, 1, AttemptStatus::Fail, SystemResult::Evaluated, true),
            attempt(2, 2, AttemptStatus::Attempting, SystemResult::InProgress, false),
        ];
        let latest = latest_qualifying(&attempts).unwrap();
        assert_eq!(latest.id, 1);
    }

    #[yare::parameterized(
        plain = { "SATISFACTORY", Some(AttemptStatus::Satisfactory) },
        lower = { "returned", Some(AttemptStatus::Returned) },
        legacy_fail = { "NOT SATISFACTORY", Some(AttemptStatus::Fail) },
        padded = { " submitted ", Some(AttemptStatus::Submitted) },
        unknown = { "bogus", None },
    )]
    fn normalizes_attempt_status(raw: &str, expected: Option<AttemptStatus>) {
        assert_eq!(normalize_attempt_status(raw), expected);
    }

    #[test]
    fn unknown_enrollment_status_is_enrolled() {
        assert_eq!(normalize_enrollment_status("DELIST"), EnrollmentStatus::Delist);
        assert_eq!(normalize_enrollment_status("whatever"), EnrollmentStatus::Enrolled);
    }
}
