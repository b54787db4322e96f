//! Persisted progress tree for one (student, course) pair.
//!
//! Every catalog id has a node; nodes are keyed by id in ordered maps so the
//! serialized document is stable. Trees are treated as values: `merge`,
//! `rollup` and `canonicalize` take trees and return new ones.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Id;
use crate::status::{lesson_status, quiz_status, topic_status, NodeStatus};

pub type Timestamp = Option<DateTime<Utc>>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NodeList<N> {
    pub count: usize,
    pub list: BTreeMap<Id, N>,
}

impl<N> Default for NodeList<N> {
    fn default() -> Self {
        Self { count: 0, list: BTreeMap::new() }
    }
}

impl<N> NodeList<N> {
    pub fn from_map(list: BTreeMap<Id, N>) -> Self {
        Self { count: list.len(), list }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct QuizNode {
    pub passed: bool,
    pub failed: bool,
    pub submitted: bool,
    pub attempted: bool,
    #[serde(with = "canonical_ts")]
    pub at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub marked_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub passed_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub failed_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub submitted_at: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TopicNode {
    pub completed: bool,
    pub submitted: bool,
    #[serde(with = "canonical_ts")]
    pub at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub completed_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub submitted_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub marked_at: Timestamp,
    pub quizzes: NodeList<QuizNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct LessonNode {
    pub completed: bool,
    pub submitted: bool,
    #[serde(with = "canonical_ts")]
    pub at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub completed_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub submitted_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub marked_at: Timestamp,
    #[serde(with = "canonical_ts")]
    pub lesson_end_at: Timestamp,
    pub topics: NodeList<TopicNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CourseDetails {
    pub course: Id,
    pub completed: bool,
    pub lessons: NodeList<LessonNode>,
}

impl CourseDetails {
    pub fn topic(&self, lesson_id: Id, topic_id: Id) -> Option<&TopicNode> {
        self.lessons.list.get(&lesson_id)?.topics.list.get(&topic_id)
    }

    pub fn quiz(&self, lesson_id: Id, topic_id: Id, quiz_id: Id) -> Option<&QuizNode> {
        self.topic(lesson_id, topic_id)?.quizzes.list.get(&quiz_id)
    }
}

/// Parse a stored `details` document. Malformed documents read as absent.
pub fn parse_details(raw: &serde_json::Value) -> Result<CourseDetails, serde_json::Error> {
    CourseDetails::deserialize(raw)
}

// --- merge ---

/// Overlay a freshly computed tree on a persisted one.
///
/// The fresh tree decides which nodes exist and owns every flag. Timestamps
/// fall back to the persisted value, but flag-paired timestamps are cleared
/// when the fresh flag is off. `marked_at` is written only by manual actions
/// and survives unless the fresh tree sets its own.
pub fn merge(existing: &CourseDetails, fresh: &CourseDetails) -> CourseDetails {
    let lessons = fresh
        .lessons
        .list
        .iter()
        .map(|(id, lesson)| {
            let merged = match existing.lessons.list.get(id) {
                Some(old) => merge_lesson(old, lesson),
                None => lesson.clone(),
            };
            (*id, merged)
        })
        .collect();
    CourseDetails {
        course: fresh.course,
        completed: fresh.completed,
        lessons: NodeList::from_map(lessons),
    }
}

fn merge_lesson(old: &LessonNode, fresh: &LessonNode) -> LessonNode {
    let topics = fresh
        .topics
        .list
        .iter()
        .map(|(id, topic)| {
            let merged = match old.topics.list.get(id) {
                Some(prev) => merge_topic(prev, topic),
                None => topic.clone(),
            };
            (*id, merged)
        })
        .collect();
    LessonNode {
        completed: fresh.completed,
        submitted: fresh.submitted,
        at: fresh.at.or(old.at),
        completed_at: paired(fresh.completed, fresh.completed_at, old.completed_at),
        submitted_at: paired(fresh.submitted, fresh.submitted_at, old.submitted_at),
        marked_at: fresh.marked_at.or(old.marked_at),
        lesson_end_at: fresh.lesson_end_at.or(old.lesson_end_at),
        topics: NodeList::from_map(topics),
    }
}

fn merge_topic(old: &TopicNode, fresh: &TopicNode) -> TopicNode {
    let quizzes = fresh
        .quizzes
        .list
        .iter()
        .map(|(id, quiz)| {
            let merged = match old.quizzes.list.get(id) {
                Some(prev) => merge_quiz(prev, quiz),
                None => quiz.clone(),
            };
            (*id, merged)
        })
        .collect();
    TopicNode {
        completed: fresh.completed,
        submitted: fresh.submitted,
        at: fresh.at.or(old.at),
        completed_at: paired(fresh.completed, fresh.completed_at, old.completed_at),
        submitted_at: paired(fresh.submitted, fresh.submitted_at, old.submitted_at),
        marked_at: fresh.marked_at.or(old.marked_at),
        quizzes: NodeList::from_map(quizzes),
    }
}

fn merge_quiz(old: &QuizNode, fresh: &QuizNode) -> QuizNode {
    QuizNode {
        passed: fresh.passed,
        failed: fresh.failed,
        submitted: fresh.submitted,
        attempted: fresh.attempted,
        at: fresh.at.or(old.at),
        marked_at: fresh.marked_at.or(old.marked_at),
        passed_at: paired(fresh.passed, fresh.passed_at, old.passed_at),
        failed_at: paired(fresh.failed, fresh.failed_at, old.failed_at),
        // evaluated attempts keep their submission time
        submitted_at: paired(fresh.submitted || fresh.passed || fresh.failed, fresh.submitted_at, old.submitted_at),
    }
}

fn paired(flag: bool, fresh: Timestamp, old: Timestamp) -> Timestamp {
    if flag {
        fresh.or(old)
    } else {
        None
    }
}

// --- rollup ---

/// Recompute topic, lesson and course flags from their children.
///
/// A topic completes when it has quizzes and all of them passed; a lesson
/// when it has topics and every topic is completed or manually marked.
/// Childless nodes only complete through a manual mark.
pub fn rollup(details: CourseDetails) -> CourseDetails {
    let lessons = details
        .lessons
        .list
        .into_iter()
        .map(|(id, lesson)| (id, rollup_lesson(lesson)))
        .collect();
    settle_course(CourseDetails { lessons: NodeList::from_map(lessons), ..details })
}

pub fn rollup_lesson(lesson: LessonNode) -> LessonNode {
    let topics = lesson
        .topics
        .list
        .into_iter()
        .map(|(id, topic)| (id, rollup_topic(topic)))
        .collect();
    settle_lesson(LessonNode { topics: NodeList::from_map(topics), ..lesson })
}

/// Course flag from lesson statuses, leaving lessons untouched.
pub fn settle_course(details: CourseDetails) -> CourseDetails {
    let lessons = &details.lessons.list;
    let completed = !lessons.is_empty() && lessons.values().all(|l| lesson_status(l).is_done());
    CourseDetails { completed, ..details }
}

/// Lesson flags from topic statuses, leaving topics untouched.
pub fn settle_lesson(lesson: LessonNode) -> LessonNode {
    let topics = &lesson.topics.list;
    let completed = !topics.is_empty() && topics.values().all(|t| topic_status(t).is_done());
    let submitted = topics.values().any(|t| topic_status(t).is_processed());
    let completed_at = if completed {
        latest(topics.values().map(|t| t.completed_at.or(t.marked_at))).or(lesson.completed_at)
    } else {
        None
    };
    let submitted_at = if submitted {
        latest(topics.values().map(|t| t.submitted_at)).or(lesson.submitted_at)
    } else {
        None
    };
    let at = latest(topics.values().map(|t| t.at)).or(lesson.at);
    LessonNode { completed, submitted, at, completed_at, submitted_at, ..lesson }
}

pub fn rollup_topic(topic: TopicNode) -> TopicNode {
    let quizzes = topic.quizzes;
    let completed = !quizzes.is_empty() && quizzes.list.values().all(|q| quiz_status(q).is_done());
    let submitted = quizzes.list.values().any(|q| quiz_status(q).is_processed() || q.attempted);
    let completed_at = if completed {
        latest(quizzes.list.values().map(|q| q.passed_at)).or(topic.completed_at)
    } else {
        None
    };
    let submitted_at = if submitted {
        latest(quizzes.list.values().map(|q| q.submitted_at)).or(topic.submitted_at)
    } else {
        None
    };
    TopicNode {
        completed,
        submitted,
        at: latest(quizzes.list.values().map(|q| q.at)).or(topic.at),
        completed_at,
        submitted_at,
        marked_at: topic.marked_at,
        quizzes: NodeList::from_map(quizzes.list),
    }
}

fn latest<I: IntoIterator<Item = Timestamp>>(values: I) -> Timestamp {
    values.into_iter().flatten().max()
}

// --- counts ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NodeCounts {
    pub lessons: usize,
    pub lessons_completed: usize,
    pub topics: usize,
    pub topics_completed: usize,
    pub quizzes: usize,
    pub quizzes_passed: usize,
    pub quizzes_pending: usize,
    pub quizzes_failed: usize,
    /// Unmarked topics without quizzes; left out of `total`.
    pub empty: usize,
    pub total: usize,
    pub processed: usize,
    pub completed: usize,
}

impl NodeCounts {
    /// Quizzes still awaiting a result or a resubmission.
    pub fn outstanding(&self) -> usize {
        self.quizzes_pending + self.quizzes_failed
    }
}

pub fn count_nodes(details: &CourseDetails) -> NodeCounts {
    let mut counts = NodeCounts::default();
    for lesson in details.lessons.list.values() {
        counts.lessons += 1;
        tally(&mut counts, lesson_status(lesson));
        if lesson_status(lesson).is_done() {
            counts.lessons_completed += 1;
        }
        for topic in lesson.topics.list.values() {
            counts.topics += 1;
            let status = topic_status(topic);
            if topic.quizzes.is_empty() && !status.is_done() {
                counts.empty += 1;
                continue;
            }
            tally(&mut counts, status);
            if status.is_done() {
                counts.topics_completed += 1;
            }
            for quiz in topic.quizzes.list.values() {
                counts.quizzes += 1;
                let status = match quiz_status(quiz) {
                    NodeStatus::Attempting if quiz.attempted => NodeStatus::Submitted,
                    status => status,
                };
                tally(&mut counts, status);
                match status {
                    NodeStatus::Satisfactory => counts.quizzes_passed += 1,
                    NodeStatus::Submitted => counts.quizzes_pending += 1,
                    NodeStatus::NotSatisfactory => counts.quizzes_failed += 1,
                    _ => {}
                }
            }
        }
    }
    counts
}

fn tally(counts: &mut NodeCounts, status: NodeStatus) {
    counts.total += 1;
    if status.is_processed() {
        counts.processed += 1;
    }
    if status.is_done() {
        counts.completed += 1;
    }
}

// --- canonical dates ---

/// Truncate every timestamp to whole seconds in UTC so the in-memory tree
/// equals what a save-and-reload produces.
pub fn canonicalize(details: CourseDetails) -> CourseDetails {
    let lessons = details
        .lessons
        .list
        .into_iter()
        .map(|(id, lesson)| {
            let topics = lesson
                .topics
                .list
                .into_iter()
                .map(|(tid, topic)| {
                    let quizzes = topic
                        .quizzes
                        .list
                        .into_iter()
                        .map(|(qid, q)| {
                            (qid, QuizNode {
                                at: canon(q.at),
                                marked_at: canon(q.marked_at),
                                passed_at: canon(q.passed_at),
                                failed_at: canon(q.failed_at),
                                submitted_at: canon(q.submitted_at),
                                ..q
                            })
                        })
                        .collect();
                    (tid, TopicNode {
                        at: canon(topic.at),
                        completed_at: canon(topic.completed_at),
                        submitted_at: canon(topic.submitted_at),
                        marked_at: canon(topic.marked_at),
                        quizzes: NodeList::from_map(quizzes),
                        ..topic
                    })
                })
                .collect();
            (id, LessonNode {
                at: canon(lesson.at),
                completed_at: canon(lesson.completed_at),
                submitted_at: canon(lesson.submitted_at),
                marked_at: canon(lesson.marked_at),
                lesson_end_at: canon(lesson.lesson_end_at),
                topics: NodeList::from_map(topics),
                ..lesson
            })
        })
        .collect();
    CourseDetails { lessons: NodeList::from_map(lessons), ..details }
}

pub fn canon(ts: Timestamp) -> Timestamp {
    ts.and_then(|t| t.with_nanosecond(0))
}

pub mod canonical_ts {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&ts.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp `{s}`"))),
        }
    }

    /// Accepts the canonical form, RFC 3339, and bare dates.
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, FORMAT) {
            return Some(ts.and_utc());
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|ts| ts.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> Timestamp {
        Some(Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap())
    }

    fn passed_quiz(day: u32) -> QuizNode {
        QuizNode { passed: true, submitted: true, at: ts(day), passed_at: ts(day), submitted_at: ts(day), ..Default::default() }
    }

    fn topic_with(quizzes: Vec<(Id, QuizNode)>) -> TopicNode {
        TopicNode { quizzes: NodeList::from_map(quizzes.into_iter().collect()), ..Default::default() }
    }

    fn course_with(topics: Vec<(Id, TopicNode)>) -> CourseDetails {
        let lesson = LessonNode { topics: NodeList::from_map(topics.into_iter().collect()), ..Default::default() };
        CourseDetails { course: 1, completed: false, lessons: NodeList::from_map(BTreeMap::from([(10, lesson)])) }
    }

    #[test]
    fn topic_completes_only_when_every_quiz_passed() {
        let tree = course_with(vec![(100, topic_with(vec![(1, passed_quiz(1)), (2, QuizNode::default())]))]);
        let tree = rollup(tree);
        let topic = tree.topic(10, 100).unwrap();
        assert!(!topic.completed);
        assert!(topic.submitted);

        let tree = course_with(vec![(100, topic_with(vec![(1, passed_quiz(1)), (2, passed_quiz(3))]))]);
        let tree = rollup(tree);
        let topic = tree.topic(10, 100).unwrap();
        assert!(topic.completed);
        assert_eq!(topic.completed_at, ts(3));
        assert!(tree.completed);
    }

    #[test]
    fn empty_topic_needs_a_mark() {
        let tree = rollup(course_with(vec![(100, topic_with(vec![(1, passed_quiz(1))])), (101, TopicNode::default())]));
        assert!(!tree.lessons.list[&10].completed);
        let counts = count_nodes(&tree);
        assert_eq!(counts.empty, 1);
        assert_eq!(counts.total, 3);

        let marked = TopicNode { marked_at: ts(4), ..Default::default() };
        let tree = rollup(course_with(vec![(100, topic_with(vec![(1, passed_quiz(1))])), (101, marked)]));
        assert!(tree.lessons.list[&10].completed);
        assert_eq!(tree.lessons.list[&10].completed_at, ts(4));
        assert_eq!(count_nodes(&tree).empty, 0);
    }

    #[test]
    fn merge_keeps_manual_marks_and_drops_stale_flag_timestamps() {
        let mut old = course_with(vec![(100, topic_with(vec![(1, passed_quiz(1))]))]);
        if let Some(lesson) = old.lessons.list.get_mut(&10) {
            lesson.marked_at = ts(7);
        }
        let fresh = course_with(vec![(100, topic_with(vec![(1, QuizNode { failed: true, failed_at: ts(8), ..Default::default() })]))]);
        let merged = merge(&old, &fresh);
        assert_eq!(merged.lessons.list[&10].marked_at, ts(7));
        let quiz = merged.quiz(10, 100, 1).unwrap();
        assert!(!quiz.passed);
        assert_eq!(quiz.passed_at, None);
        assert_eq!(quiz.failed_at, ts(8));
        assert_eq!(quiz.at, ts(1));
    }

    #[test]
    fn merge_drops_nodes_missing_from_fresh_tree() {
        let old = course_with(vec![(100, topic_with(vec![(1, passed_quiz(1)), (2, passed_quiz(2))]))]);
        let fresh = course_with(vec![(100, topic_with(vec![(1, QuizNode::default())]))]);
        let merged = merge(&old, &fresh);
        assert_eq!(merged.topic(10, 100).unwrap().quizzes.count, 1);
    }

    #[test]
    fn counts_split_pending_and_failed() {
        let failed = QuizNode { failed: true, ..Default::default() };
        let pending = QuizNode { submitted: true, ..Default::default() };
        let tree = rollup(course_with(vec![(100, topic_with(vec![(1, passed_quiz(1)), (2, failed), (3, pending)]))]));
        let counts = count_nodes(&tree);
        assert_eq!(counts.quizzes_passed, 1);
        assert_eq!(counts.quizzes_failed, 1);
        assert_eq!(counts.quizzes_pending, 1);
        assert_eq!(counts.total, 5);
        assert_eq!(counts.processed, 5);
        assert_eq!(counts.completed, 1);
    }

    #[test]
    fn drafts_count_as_pending() {
        let draft = QuizNode { attempted: true, at: ts(2), ..Default::default() };
        let tree = rollup(course_with(vec![(100, topic_with(vec![(1, draft.clone()), (2, draft)]))]));
        let counts = count_nodes(&tree);
        assert_eq!(counts.quizzes_passed, 0);
        assert_eq!(counts.quizzes_pending, 2);
        assert_eq!(counts.processed, counts.total);
        assert_eq!(counts.outstanding(), 2);
    }

    #[test]
    fn merge_keeps_submission_time_of_evaluated_quizzes() {
        let passed = QuizNode { passed: true, at: ts(3), passed_at: ts(3), submitted_at: ts(2), ..Default::default() };
        let failed = QuizNode { failed: true, at: ts(5), failed_at: ts(5), submitted_at: ts(4), ..Default::default() };
        let tree = rollup(course_with(vec![(100, topic_with(vec![(1, passed), (2, failed)]))]));

        let merged = rollup(merge(&tree, &tree));
        assert_eq!(merged, tree);
        assert_eq!(merged.quiz(10, 100, 1).unwrap().submitted_at, ts(2));
        assert_eq!(merged.quiz(10, 100, 2).unwrap().submitted_at, ts(4));
        assert_eq!(merged.topic(10, 100).unwrap().submitted_at, ts(4));
    }

    #[test]
    fn canonical_timestamps_survive_a_json_round_trip() {
        let precise = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(345);
        let tree = course_with(vec![(100, topic_with(vec![(1, QuizNode { at: Some(precise), attempted: true, ..Default::default() })]))]);
        let tree = canonicalize(tree);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["lessons"]["list"]["10"]["topics"]["list"]["100"]["quizzes"]["list"]["1"]["at"], "2024-05-01 10:00:00");
        assert_eq!(parse_details(&json).unwrap(), tree);
    }

    #[test]
    fn legacy_timestamp_formats_are_accepted() {
        assert_eq!(canonical_ts::parse("2024-05-01T10:00:00+02:00"), Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()));
        assert_eq!(canonical_ts::parse("2024-05-01"), Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert!(parse_details(&serde_json::json!({"lessons": {"list": {"1": {"at": "not a date"}}}})).is_err());
    }
}
