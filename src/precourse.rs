// Pre-course assessment substitution for the first topic of a main course.

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::facts::{Catalog, CourseFacts, FactStore};
use crate::models::{AttemptStatus, QuizAttempt};
use crate::snapshot::{rollup_topic, settle_course, settle_lesson, CourseDetails, QuizNode, TopicNode};
use crate::status::latest_qualifying;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrecourseSource {
    Current,
    Legacy,
}

/// Pre-course attempt standing in for the course's first quiz, if any.
pub fn resolve<'a>(facts: &'a CourseFacts, config: &EngineConfig) -> Option<(PrecourseSource, &'a QuizAttempt)> {
    if !config.takes_precourse(&facts.catalog.course) {
        return None;
    }
    if let Some(attempt) = latest_qualifying(&facts.precourse.current) {
        return Some((PrecourseSource::Current, attempt));
    }
    if !legacy_allowed(facts, config) {
        return None;
    }
    facts
        .precourse
        .legacy
        .iter()
        .max_by_key(|a| (a.attempt, a.activity_at(), a.id))
        .map(|attempt| (PrecourseSource::Legacy, attempt))
}

/// Enrollments starting on or after the cutoff are not grandfathered.
fn legacy_allowed(facts: &CourseFacts, config: &EngineConfig) -> bool {
    let Some(cutoff) = config.legacy_cutoff else {
        return true;
    };
    match facts.enrollment.as_ref().and_then(|e| e.course_start_at) {
        Some(start) => start.date_naive() < cutoff,
        None => true,
    }
}

/// Overwrite the first quiz with the pre-course result and re-settle its
/// topic, lesson and the course. Other nodes are left as computed.
pub fn apply(details: CourseDetails, facts: &CourseFacts, config: &EngineConfig) -> CourseDetails {
    let Some((source, attempt)) = resolve(facts, config) else {
        return details;
    };
    let Some((lesson, topic, quiz)) = facts.catalog.first_path() else {
        tracing::warn!(course_id = facts.course_id(), "course has no order-0 lesson/topic/quiz; pre-course result not applied");
        return details;
    };
    let (lesson_id, topic_id, quiz_id) = (lesson.id, topic.id, quiz.id);

    let mut details = details;
    let Some(lesson_node) = details.lessons.list.remove(&lesson_id) else {
        return details;
    };
    let mut lesson_node = lesson_node;
    if let Some(topic_node) = lesson_node.topics.list.remove(&topic_id) {
        let mut topic_node = topic_node;
        let previous = topic_node.quizzes.list.remove(&quiz_id).unwrap_or_default();
        let quiz_node = substitute(&previous, attempt);
        let satisfied = quiz_node.passed;
        topic_node.quizzes.list.insert(quiz_id, quiz_node);
        let topic_node = if satisfied { complete_topic(topic_node) } else { rollup_topic(topic_node) };
        lesson_node.topics.list.insert(topic_id, topic_node);
        tracing::debug!(course_id = facts.course_id(), ?source, status = attempt.status.as_str(), "pre-course result applied");
    }
    details.lessons.list.insert(lesson_id, settle_lesson(lesson_node));
    settle_course(details)
}

fn substitute(previous: &QuizNode, attempt: &QuizAttempt) -> QuizNode {
    let evaluated_at = Some(attempt.updated_at);
    let mut node = QuizNode {
        attempted: true,
        at: Some(attempt.activity_at()),
        marked_at: previous.marked_at,
        ..QuizNode::default()
    };
    match attempt.status {
        AttemptStatus::Satisfactory => {
            node.passed = true;
            node.passed_at = evaluated_at;
            node.submitted_at = attempt.submitted_at.or(evaluated_at);
        }
        status if status.is_failed() => {
            node.failed = true;
            node.failed_at = evaluated_at;
            node.submitted_at = attempt.submitted_at;
        }
        AttemptStatus::Attempting if attempt.submitted_at.is_none() => {}
        _ => {
            node.submitted = true;
            node.submitted_at = attempt.submitted_at.or(evaluated_at);
        }
    }
    node
}

fn complete_topic(topic: TopicNode) -> TopicNode {
    let rolled = rollup_topic(topic);
    let passed_at = rolled.quizzes.list.values().filter_map(|q| q.passed_at).max();
    TopicNode {
        completed: true,
        submitted: true,
        completed_at: rolled.completed_at.or(passed_at),
        submitted_at: rolled.submitted_at.or(passed_at),
        ..rolled
    }
}

/// Every course that takes the pre-course substitution must expose an
/// order-0 lesson, topic and quiz.
pub fn check_ordering(catalog: &Catalog, config: &EngineConfig) -> Result<()> {
    if !config.takes_precourse(&catalog.course) || catalog.first_path().is_some() {
        return Ok(());
    }
    Err(EngineError::OrderingContract(format!(
        "course {} ({}) lacks an order-0 lesson, topic and quiz",
        catalog.course.id, catalog.course.title
    )))
}

/// Startup check across the whole catalog.
pub async fn verify_ordering_contract<S>(store: &S, config: &EngineConfig) -> Result<usize>
where
    S: FactStore + ?Sized,
{
    let mut checked = 0;
    for course in store.courses().await? {
        if !config.takes_precourse(&course) {
            continue;
        }
        let course_id = course.id;
        let catalog = Catalog::new(
            course,
            store.lessons(course_id).await?,
            store.topics(course_id).await?,
            store.quizzes(course_id).await?,
        );
        check_ordering(&catalog, config)?;
        checked += 1;
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_tree;
    use crate::config::test_config;
    use crate::facts::{ActivityIndex, PrecourseAttempts};
    use crate::models::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn catalog(category: Option<Id>, topics_in_first_lesson: usize) -> Catalog {
        let course = Course { id: 1, title: "Cert III Individual Support".into(), category_id: category, is_main_course: true };
        let lessons = vec![
            Lesson { id: 10, course_id: 1, title: "LLN".into(), order: 0, has_work_placement: false },
            Lesson { id: 11, course_id: 1, title: "Unit 1".into(), order: 1, has_work_placement: false },
        ];
        let mut topics = vec![Topic { id: 100, course_id: 1, lesson_id: 10, title: "LLN".into(), order: 0 }];
        let mut quizzes = vec![Quiz { id: 1000, course_id: 1, lesson_id: 10, topic_id: 100, title: "LLN".into(), order: 0, has_checklist: false }];
        if topics_in_first_lesson > 1 {
            topics.push(Topic { id: 101, course_id: 1, lesson_id: 10, title: "Intro".into(), order: 1 });
            quizzes.push(Quiz { id: 1010, course_id: 1, lesson_id: 10, topic_id: 101, title: "Intro".into(), order: 0, has_checklist: false });
        }
        topics.push(Topic { id: 110, course_id: 1, lesson_id: 11, title: "T".into(), order: 0 });
        quizzes.push(Quiz { id: 1100, course_id: 1, lesson_id: 11, topic_id: 110, title: "Q".into(), order: 0, has_checklist: false });
        Catalog::new(course, lessons, topics, quizzes)
    }

    fn precourse_attempt(quiz_id: Id, status: AttemptStatus) -> QuizAttempt {
        let at = Utc.with_ymd_and_hms(2023, 2, 1, 9, 0, 0).unwrap();
        QuizAttempt {
            id: 1,
            user_id: 7,
            course_id: 900,
            lesson_id: 1,
            topic_id: 1,
            quiz_id,
            attempt: 1,
            status,
            system_result: SystemResult::Evaluated,
            submitted_at: Some(at),
            accessed_at: Some(at),
            updated_at: at,
        }
    }

    fn facts(catalog: Catalog, precourse: PrecourseAttempts) -> CourseFacts {
        CourseFacts {
            student_id: 7,
            student: None,
            catalog,
            enrollment: Some(Enrollment {
                id: 1,
                user_id: 7,
                course_id: 1,
                status: EnrollmentStatus::Enrolled,
                course_start_at: Some(Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap()),
                course_ends_at: None,
            }),
            attempts: Vec::new(),
            competencies: Vec::new(),
            activities: ActivityIndex::default(),
            unlocks: Vec::new(),
            precourse,
        }
    }

    fn legacy_pass() -> PrecourseAttempts {
        PrecourseAttempts { current: Vec::new(), legacy: vec![precourse_attempt(9001, AttemptStatus::Satisfactory)] }
    }

    #[test]
    fn legacy_pass_completes_first_topic_and_sole_topic_lesson() {
        let config = test_config();
        let facts = facts(catalog(Some(1), 1), legacy_pass());
        let tree = build_tree(&facts, &config);
        assert!(tree.quiz(10, 100, 1000).unwrap().passed);
        assert!(tree.topic(10, 100).unwrap().completed);
        assert!(tree.lessons.list[&10].completed);
        assert!(!tree.lessons.list[&11].completed);
    }

    #[test]
    fn lesson_with_more_topics_is_not_completed_by_substitution() {
        let config = test_config();
        let facts = facts(catalog(Some(1), 2), legacy_pass());
        let tree = build_tree(&facts, &config);
        assert!(tree.topic(10, 100).unwrap().completed);
        assert!(!tree.lessons.list[&10].completed);
    }

    #[test]
    fn excluded_category_ignores_legacy_pass() {
        let config = test_config();
        let facts = facts(catalog(Some(77), 1), legacy_pass());
        let tree = build_tree(&facts, &config);
        assert!(!tree.quiz(10, 100, 1000).unwrap().passed);
        assert!(!tree.topic(10, 100).unwrap().completed);
    }

    #[test]
    fn current_attempt_takes_precedence_over_legacy() {
        let config = test_config();
        let precourse = PrecourseAttempts {
            current: vec![precourse_attempt(9011, AttemptStatus::Submitted)],
            legacy: vec![precourse_attempt(9001, AttemptStatus::Satisfactory)],
        };
        let facts = facts(catalog(None, 1), precourse);
        let (source, _) = resolve(&facts, &config).unwrap();
        assert_eq!(source, PrecourseSource::Current);
        let tree = build_tree(&facts, &config);
        let quiz = tree.quiz(10, 100, 1000).unwrap();
        assert!(quiz.submitted && !quiz.passed);
        assert!(!tree.topic(10, 100).unwrap().completed);
    }

    #[test]
    fn cutoff_stops_grandfathering_onto_legacy() {
        let mut config = test_config();
        config.legacy_cutoff = NaiveDate::from_ymd_opt(2023, 1, 1);
        let facts = facts(catalog(None, 1), legacy_pass());
        assert!(resolve(&facts, &config).is_none());
        config.legacy_cutoff = NaiveDate::from_ymd_opt(2023, 6, 1);
        assert!(resolve(&facts, &config).is_some());
    }

    #[test]
    fn continuation_courses_are_skipped() {
        let config = test_config();
        let mut catalog = catalog(None, 1);
        catalog.course.title = "Cert III Semester 2".into();
        let facts = facts(catalog, legacy_pass());
        assert!(resolve(&facts, &config).is_none());
    }

    #[test]
    fn ordering_contract_rejects_missing_first_quiz() {
        let config = test_config();
        let course = Course { id: 1, title: "Cert".into(), category_id: None, is_main_course: true };
        let lessons = vec![Lesson { id: 10, course_id: 1, title: "L".into(), order: 0, has_work_placement: false }];
        let topics = vec![Topic { id: 100, course_id: 1, lesson_id: 10, title: "T".into(), order: 0 }];
        let quizzes = vec![Quiz { id: 1000, course_id: 1, lesson_id: 10, topic_id: 100, title: "Q".into(), order: 2, has_checklist: false }];
        let bad = Catalog::new(course, lessons, topics, quizzes);
        assert!(matches!(check_ordering(&bad, &config), Err(EngineError::OrderingContract(_))));
        assert!(check_ordering(&catalog(None, 1), &config).is_ok());
    }
}
