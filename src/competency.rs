//! Competency evaluation per (student, lesson).
//!
//! A lesson moves `NotReady -> Ready -> Competent`. `Ready` needs the lesson
//! completed, a satisfactory latest checklist for every checklist quiz, and a
//! work-placement confirmation when the lesson asks for one. The automatic
//! transition to `Competent` only happens from `Ready`; an authorized mark
//! can force it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::facts::CourseFacts;
use crate::models::{ChecklistStatus, Id, MarkCompetencyReq, NewCompetency, QuizAttempt};
use crate::snapshot::CourseDetails;
use crate::status::lesson_status;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "reasons", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    NotReady(Vec<Blocker>),
    Ready,
    Competent,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Blocker {
    UnknownLesson,
    LessonIncomplete,
    ChecklistMissing { quiz_id: Id },
    ChecklistNotSatisfactory { quiz_id: Id },
    WorkPlacementMissing,
}

pub fn evaluate(facts: &CourseFacts, details: &CourseDetails, lesson_id: Id) -> Readiness {
    if facts.competency(lesson_id).is_some_and(|c| c.is_competent) {
        return Readiness::Competent;
    }
    let Some(lesson) = facts.catalog.lesson(lesson_id) else {
        return Readiness::NotReady(vec![Blocker::UnknownLesson]);
    };

    let mut blockers = Vec::new();
    let completed = details
        .lessons
        .list
        .get(&lesson_id)
        .is_some_and(|node| lesson_status(node).is_done());
    if !completed {
        blockers.push(Blocker::LessonIncomplete);
    }

    for quiz in facts.catalog.lesson_quizzes(lesson_id).filter(|q| q.has_checklist) {
        match facts.activities.checklist_status(quiz.id) {
            Some(ChecklistStatus::Satisfactory) => {}
            Some(ChecklistStatus::NotSatisfactory) => {
                blockers.push(Blocker::ChecklistNotSatisfactory { quiz_id: quiz.id })
            }
            None => blockers.push(Blocker::ChecklistMissing { quiz_id: quiz.id }),
        }
    }

    if lesson.has_work_placement && facts.activities.work_placement(lesson_id).is_none() {
        blockers.push(Blocker::WorkPlacementMissing);
    }

    if blockers.is_empty() {
        Readiness::Ready
    } else {
        Readiness::NotReady(blockers)
    }
}

/// Competency record for the automatic transition, if the lesson is ready.
pub fn plan_automatic(facts: &CourseFacts, details: &CourseDetails, lesson_id: Id, now: DateTime<Utc>) -> Option<NewCompetency> {
    if evaluate(facts, details, lesson_id) != Readiness::Ready {
        return None;
    }
    let (first, last) = attempt_window(facts, lesson_id);
    Some(NewCompetency {
        user_id: facts.student_id,
        course_id: facts.course_id(),
        lesson_id,
        competent_on: last.unwrap_or(now),
        course_start: course_start(facts),
        lesson_start: first.map(|t| t.date_naive()),
        lesson_end: last.map(|t| t.date_naive()),
        notes: None,
        param: Some(serde_json::json!({ "source": "system" })),
    })
}

/// Competency record for an authorized mark. Already-competent lessons are
/// left alone unless `force` is set.
pub fn plan_mark(
    facts: &CourseFacts,
    lesson_id: Id,
    req: &MarkCompetencyReq,
    now: DateTime<Utc>,
) -> Option<NewCompetency> {
    if facts.competency(lesson_id).is_some_and(|c| c.is_competent) && !req.force {
        return None;
    }
    let (first, _) = attempt_window(facts, lesson_id);
    Some(NewCompetency {
        user_id: facts.student_id,
        course_id: facts.course_id(),
        lesson_id,
        competent_on: now,
        course_start: course_start(facts),
        lesson_start: req.lesson_start.or(first.map(|t| t.date_naive())),
        lesson_end: Some(req.lesson_end),
        notes: Some(req.remarks.clone()),
        param: Some(serde_json::json!({ "source": "manual", "marked_by": req.marked_by, "forced": req.force })),
    })
}

/// First and last qualifying attempt timestamps inside the lesson.
fn attempt_window(facts: &CourseFacts, lesson_id: Id) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let times = || {
        facts
            .attempts
            .iter()
            .filter(move |a| a.lesson_id == lesson_id && a.is_qualifying())
            .map(QuizAttempt::activity_at)
    };
    (times().min(), times().max())
}

fn course_start(facts: &CourseFacts) -> Option<NaiveDate> {
    facts
        .enrollment
        .as_ref()
        .and_then(|e| e.course_start_at)
        .map(|t| t.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_tree;
    use crate::config::test_config;
    use crate::facts::{ActivityIndex, Catalog, PrecourseAttempts};
    use crate::models::*;
    use chrono::{Duration, TimeZone};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::days(day)
    }

    fn passed(id: Id, quiz_id: Id) -> QuizAttempt {
        QuizAttempt {
            id,
            user_id: 4,
            course_id: 3,
            lesson_id: 30,
            topic_id: 300,
            quiz_id,
            attempt: 1,
            status: AttemptStatus::Satisfactory,
            system_result: SystemResult::Evaluated,
            submitted_at: Some(t(id)),
            accessed_at: Some(t(id)),
            updated_at: t(id),
        }
    }

    fn checklist(id: Id, quiz_id: Id, status: ChecklistStatus) -> StudentActivity {
        StudentActivity { id, user_id: 4, event: ActivityEvent::Checklist, attachable: Attachable::Quiz(quiz_id), status: Some(status), created_at: t(id) }
    }

    fn facts(work_placement: bool, activities: Vec<StudentActivity>, competencies: Vec<Competency>) -> CourseFacts {
        let course = Course { id: 3, title: "Elective".into(), category_id: None, is_main_course: false };
        let catalog = Catalog::new(
            course,
            vec![Lesson { id: 30, course_id: 3, title: "L".into(), order: 0, has_work_placement: work_placement }],
            vec![Topic { id: 300, course_id: 3, lesson_id: 30, title: "T".into(), order: 0 }],
            vec![
                Quiz { id: 3000, course_id: 3, lesson_id: 30, topic_id: 300, title: "Written".into(), order: 0, has_checklist: false },
                Quiz { id: 3001, course_id: 3, lesson_id: 30, topic_id: 300, title: "Observed".into(), order: 1, has_checklist: true },
            ],
        );
        CourseFacts {
            student_id: 4,
            student: None,
            catalog,
            enrollment: Some(Enrollment {
                id: 1,
                user_id: 4,
                course_id: 3,
                status: EnrollmentStatus::Enrolled,
                course_start_at: Some(t(-30)),
                course_ends_at: Some(t(60)),
            }),
            attempts: vec![passed(1, 3000), passed(2, 3001)],
            competencies,
            activities: ActivityIndex::new(activities),
            unlocks: Vec::new(),
            precourse: PrecourseAttempts::default(),
        }
    }

    #[test]
    fn not_satisfactory_checklist_blocks_competency() {
        let facts = facts(false, vec![checklist(1, 3001, ChecklistStatus::Satisfactory), checklist(2, 3001, ChecklistStatus::NotSatisfactory)], Vec::new());
        let tree = build_tree(&facts, &test_config());
        assert!(tree.lessons.list[&30].completed);
        assert_eq!(
            evaluate(&facts, &tree, 30),
            Readiness::NotReady(vec![Blocker::ChecklistNotSatisfactory { quiz_id: 3001 }])
        );
        assert!(plan_automatic(&facts, &tree, 30, t(10)).is_none());
    }

    #[test]
    fn missing_checklist_and_placement_are_reported() {
        let facts = facts(true, Vec::new(), Vec::new());
        let tree = build_tree(&facts, &test_config());
        assert_eq!(
            evaluate(&facts, &tree, 30),
            Readiness::NotReady(vec![Blocker::ChecklistMissing { quiz_id: 3001 }, Blocker::WorkPlacementMissing])
        );
    }

    #[test]
    fn ready_lesson_plans_record_from_attempt_window() {
        let activities = vec![
            checklist(1, 3001, ChecklistStatus::Satisfactory),
            StudentActivity { id: 5, user_id: 4, event: ActivityEvent::WorkPlacement, attachable: Attachable::Lesson(30), status: None, created_at: t(3) },
        ];
        let facts = facts(true, activities, Vec::new());
        let tree = build_tree(&facts, &test_config());
        assert_eq!(evaluate(&facts, &tree, 30), Readiness::Ready);
        let record = plan_automatic(&facts, &tree, 30, t(10)).unwrap();
        assert_eq!(record.lesson_start, Some(t(1).date_naive()));
        assert_eq!(record.lesson_end, Some(t(2).date_naive()));
        assert_eq!(record.competent_on, t(2));
        assert_eq!(record.course_start, Some(t(-30).date_naive()));
    }

    #[test]
    fn mark_is_noop_when_competent_unless_forced() {
        let existing = Competency {
            id: 1,
            user_id: 4,
            course_id: 3,
            lesson_id: 30,
            is_competent: true,
            competent_on: Some(t(2)),
            course_start: None,
            lesson_start: None,
            lesson_end: None,
            notes: None,
            param: None,
        };
        let facts = facts(false, Vec::new(), vec![existing]);
        let tree = build_tree(&facts, &test_config());
        assert_eq!(evaluate(&facts, &tree, 30), Readiness::Competent);
        let mut req = MarkCompetencyReq { remarks: "Observed on site".into(), lesson_end: t(5).date_naive(), lesson_start: None, force: false, marked_by: Some(99) };
        assert!(plan_mark(&facts, 30, &req, t(6)).is_none());
        req.force = true;
        let record = plan_mark(&facts, 30, &req, t(6)).unwrap();
        assert_eq!(record.notes.as_deref(), Some("Observed on site"));
        assert_eq!(record.lesson_end, Some(t(5).date_naive()));
        assert_eq!(record.lesson_start, Some(t(1).date_naive()));
    }

    #[test]
    fn unknown_lesson_is_not_ready() {
        let facts = facts(false, Vec::new(), Vec::new());
        let tree = build_tree(&facts, &test_config());
        assert_eq!(evaluate(&facts, &tree, 999), Readiness::NotReady(vec![Blocker::UnknownLesson]));
    }
}
