// Fresh tree construction: quiz nodes from attempt history, then the
// container flags rolled up bottom-up.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::config::EngineConfig;
use crate::facts::CourseFacts;
use crate::models::{AttemptStatus, Id, QuizAttempt, SystemResult};
use crate::precourse;
use crate::snapshot::{canonicalize, rollup, CourseDetails, LessonNode, NodeList, QuizNode, TopicNode};
use crate::status::latest_qualifying;

/// Compute the tree for one (student, course) from facts alone.
pub fn build_tree(facts: &CourseFacts, config: &EngineConfig) -> CourseDetails {
    warn_orphan_attempts(facts);
    let catalog = &facts.catalog;
    let lessons = catalog
        .lessons
        .iter()
        .map(|lesson| {
            let topics = catalog
                .topics_of(lesson.id)
                .iter()
                .map(|topic| {
                    let quizzes = catalog
                        .quizzes_of(topic.id)
                        .iter()
                        .map(|quiz| (quiz.id, quiz_node(facts.attempts_for(quiz.id))))
                        .collect::<BTreeMap<Id, QuizNode>>();
                    let node = TopicNode { quizzes: NodeList::from_map(quizzes), ..TopicNode::default() };
                    (topic.id, node)
                })
                .collect::<BTreeMap<Id, TopicNode>>();
            let node = LessonNode {
                at: facts.unlock(lesson.id).map(|u| u.unlocked_at),
                lesson_end_at: facts
                    .competency(lesson.id)
                    .filter(|c| c.is_competent)
                    .and_then(|c| c.lesson_end)
                    .map(start_of_day),
                topics: NodeList::from_map(topics),
                ..LessonNode::default()
            };
            (lesson.id, node)
        })
        .collect::<BTreeMap<Id, LessonNode>>();

    let raw = CourseDetails {
        course: catalog.course.id,
        completed: false,
        lessons: NodeList::from_map(lessons),
    };
    derive(raw, facts, config)
}

/// Roll up, apply the pre-course substitution and canonicalize dates.
/// Used both on fresh trees and on merged trees.
pub fn derive(details: CourseDetails, facts: &CourseFacts, config: &EngineConfig) -> CourseDetails {
    canonicalize(precourse::apply(rollup(details), facts, config))
}

/// Quiz flags come from the latest qualifying attempt.
pub fn quiz_node<'a, I>(attempts: I) -> QuizNode
where
    I: IntoIterator<Item = &'a QuizAttempt>,
{
    let attempts: Vec<&QuizAttempt> = attempts.into_iter().collect();
    if attempts.is_empty() {
        return QuizNode::default();
    }
    let mut node = QuizNode {
        attempted: true,
        at: attempts.iter().map(|a| a.activity_at()).max(),
        ..QuizNode::default()
    };
    let Some(latest) = latest_qualifying(attempts.iter().copied()) else {
        return node;
    };
    let evaluated_at = Some(latest.updated_at);
    if latest.system_result == SystemResult::Marked {
        node.marked_at = evaluated_at;
    }
    node.submitted_at = latest.submitted_at;
    match latest.status {
        AttemptStatus::Satisfactory => {
            node.passed = true;
            node.passed_at = evaluated_at;
        }
        status if status.is_failed() => {
            node.failed = true;
            node.failed_at = evaluated_at;
        }
        _ => {
            node.submitted = latest.submitted_at.is_some();
        }
    }
    node
}

fn warn_orphan_attempts(facts: &CourseFacts) {
    let orphans: HashSet<Id> = facts
        .attempts
        .iter()
        .filter(|a| facts.catalog.quiz(a.quiz_id).is_none())
        .map(|a| a.quiz_id)
        .collect();
    for quiz_id in orphans {
        tracing::warn!(
            student_id = facts.student_id,
            course_id = facts.course_id(),
            quiz_id,
            "attempts reference a quiz missing from the catalog; skipped"
        );
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::default()).and_utc()
}
