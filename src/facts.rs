//! Read-only access to the raw records progress is derived from.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::error::{EngineError, Result};
use crate::models::*;

#[async_trait]
pub trait FactStore: Send + Sync {
    async fn courses(&self) -> Result<Vec<Course>>;
    async fn course(&self, course_id: Id) -> Result<Option<Course>>;
    async fn lesson(&self, lesson_id: Id) -> Result<Option<Lesson>>;
    async fn lessons(&self, course_id: Id) -> Result<Vec<Lesson>>;
    async fn topics(&self, course_id: Id) -> Result<Vec<Topic>>;
    async fn quizzes(&self, course_id: Id) -> Result<Vec<Quiz>>;
    async fn attempt(&self, attempt_id: Id) -> Result<Option<QuizAttempt>>;
    async fn course_attempts(&self, user_id: Id, course_id: Id) -> Result<Vec<QuizAttempt>>;
    async fn quiz_attempts(&self, user_id: Id, quiz_id: Id) -> Result<Vec<QuizAttempt>>;
    async fn competencies(&self, user_id: Id, course_id: Id) -> Result<Vec<Competency>>;
    async fn activities(&self, user_id: Id) -> Result<Vec<StudentActivity>>;
    async fn unlocks(&self, user_id: Id, course_id: Id) -> Result<Vec<LessonUnlock>>;
    async fn enrollment(&self, user_id: Id, course_id: Id) -> Result<Option<Enrollment>>;
    async fn enrollments(&self, user_id: Id) -> Result<Vec<Enrollment>>;
    async fn all_enrollments(&self) -> Result<Vec<Enrollment>>;
    async fn student(&self, user_id: Id) -> Result<Option<Student>>;
}

/// Course catalog with children grouped by parent and sorted by `order`.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub course: Course,
    pub lessons: Vec<Lesson>,
    pub topics: BTreeMap<Id, Vec<Topic>>,
    pub quizzes: BTreeMap<Id, Vec<Quiz>>,
    quiz_index: HashMap<Id, Quiz>,
}

impl Catalog {
    /// Children whose parent is missing from the catalog are dropped with a warning.
    pub fn new(course: Course, mut lessons: Vec<Lesson>, topics: Vec<Topic>, quizzes: Vec<Quiz>) -> Self {
        lessons.retain(|l| l.course_id == course.id);
        lessons.sort_by_key(|l| (l.order, l.id));

        let mut by_lesson: BTreeMap<Id, Vec<Topic>> = lessons.iter().map(|l| (l.id, Vec::new())).collect();
        for topic in topics {
            match by_lesson.get_mut(&topic.lesson_id) {
                Some(list) => list.push(topic),
                None => tracing::warn!(course_id = course.id, topic_id = topic.id, lesson_id = topic.lesson_id, "topic references missing lesson; skipped"),
            }
        }
        for list in by_lesson.values_mut() {
            list.sort_by_key(|t| (t.order, t.id));
        }

        let mut by_topic: BTreeMap<Id, Vec<Quiz>> =
            by_lesson.values().flatten().map(|t| (t.id, Vec::new())).collect();
        let mut quiz_index = HashMap::new();
        for quiz in quizzes {
            match by_topic.get_mut(&quiz.topic_id) {
                Some(list) => {
                    quiz_index.insert(quiz.id, quiz.clone());
                    list.push(quiz);
                }
                None => tracing::warn!(course_id = course.id, quiz_id = quiz.id, topic_id = quiz.topic_id, "quiz references missing topic; skipped"),
            }
        }
        for list in by_topic.values_mut() {
            list.sort_by_key(|q| (q.order, q.id));
        }

        Catalog { course, lessons, topics: by_lesson, quizzes: by_topic, quiz_index }
    }

    pub fn topics_of(&self, lesson_id: Id) -> &[Topic] {
        self.topics.get(&lesson_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn quizzes_of(&self, topic_id: Id) -> &[Quiz] {
        self.quizzes.get(&topic_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lesson(&self, lesson_id: Id) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }

    pub fn quiz(&self, quiz_id: Id) -> Option<&Quiz> {
        self.quiz_index.get(&quiz_id)
    }

    pub fn lesson_quizzes(&self, lesson_id: Id) -> impl Iterator<Item = &Quiz> {
        self.topics_of(lesson_id).iter().flat_map(|t| self.quizzes_of(t.id).iter())
    }

    /// First lesson, its first topic and that topic's first quiz, each at `order == 0`.
    pub fn first_path(&self) -> Option<(&Lesson, &Topic, &Quiz)> {
        let lesson = self.lessons.first().filter(|l| l.order == 0)?;
        let topic = self.topics_of(lesson.id).first().filter(|t| t.order == 0)?;
        let quiz = self.quizzes_of(topic.id).first().filter(|q| q.order == 0)?;
        Some((lesson, topic, quiz))
    }
}

/// Checklist and work-placement events split by what they are attached to.
#[derive(Debug, Clone, Default)]
pub struct ActivityIndex {
    checklists: HashMap<Id, Vec<StudentActivity>>,
    work_placements: HashMap<Id, Vec<StudentActivity>>,
}

impl ActivityIndex {
    pub fn new(activities: Vec<StudentActivity>) -> Self {
        let mut index = ActivityIndex::default();
        for activity in activities {
            match (activity.event, activity.attachable) {
                (ActivityEvent::Checklist, Attachable::Quiz(quiz_id)) => {
                    index.checklists.entry(quiz_id).or_default().push(activity)
                }
                (ActivityEvent::WorkPlacement, Attachable::Lesson(lesson_id)) => {
                    index.work_placements.entry(lesson_id).or_default().push(activity)
                }
                (event, attachable) => {
                    tracing::debug!(?event, ?attachable, id = activity.id, "activity attached to unexpected kind; ignored")
                }
            }
        }
        index
    }

    /// Latest checklist by id for a quiz; later records supersede earlier ones.
    pub fn latest_checklist(&self, quiz_id: Id) -> Option<&StudentActivity> {
        self.checklists.get(&quiz_id)?.iter().max_by_key(|a| a.id)
    }

    pub fn checklist_status(&self, quiz_id: Id) -> Option<ChecklistStatus> {
        self.latest_checklist(quiz_id).and_then(|a| a.status)
    }

    pub fn work_placement(&self, lesson_id: Id) -> Option<&StudentActivity> {
        self.work_placements.get(&lesson_id)?.iter().max_by_key(|a| a.id)
    }
}

/// Pre-course attempts for the student, current and legacy.
#[derive(Debug, Clone, Default)]
pub struct PrecourseAttempts {
    pub current: Vec<QuizAttempt>,
    pub legacy: Vec<QuizAttempt>,
}

/// Everything needed to compute one (student, course) tree.
#[derive(Debug, Clone)]
pub struct CourseFacts {
    pub student_id: Id,
    pub student: Option<Student>,
    pub catalog: Catalog,
    pub enrollment: Option<Enrollment>,
    pub attempts: Vec<QuizAttempt>,
    pub competencies: Vec<Competency>,
    pub activities: ActivityIndex,
    pub unlocks: Vec<LessonUnlock>,
    pub precourse: PrecourseAttempts,
}

impl CourseFacts {
    pub async fn load<S>(store: &S, student_id: Id, course_id: Id, precourse: PrecourseAttempts) -> Result<Self>
    where
        S: FactStore + ?Sized,
    {
        let course = store
            .course(course_id)
            .await?
            .ok_or_else(|| EngineError::not_found("course", course_id))?;
        let catalog = Catalog::new(
            course,
            store.lessons(course_id).await?,
            store.topics(course_id).await?,
            store.quizzes(course_id).await?,
        );
        Ok(CourseFacts {
            student_id,
            student: store.student(student_id).await?,
            catalog,
            enrollment: store.enrollment(student_id, course_id).await?,
            attempts: store.course_attempts(student_id, course_id).await?,
            competencies: store.competencies(student_id, course_id).await?,
            activities: ActivityIndex::new(store.activities(student_id).await?),
            unlocks: store.unlocks(student_id, course_id).await?,
            precourse,
        })
    }

    pub fn course_id(&self) -> Id {
        self.catalog.course.id
    }

    pub fn attempts_for(&self, quiz_id: Id) -> impl Iterator<Item = &QuizAttempt> {
        self.attempts.iter().filter(move |a| a.quiz_id == quiz_id)
    }

    pub fn competency(&self, lesson_id: Id) -> Option<&Competency> {
        self.competencies.iter().find(|c| c.lesson_id == lesson_id)
    }

    pub fn unlock(&self, lesson_id: Id) -> Option<&LessonUnlock> {
        self.unlocks.iter().filter(|u| u.lesson_id == lesson_id).min_by_key(|u| u.unlocked_at)
    }

    pub fn is_onboarded(&self) -> bool {
        self.student.as_ref().is_some_and(|s| s.onboarded_at.is_some())
    }
}

/// Load both pre-course histories once per student.
pub async fn load_precourse<S>(store: &S, student_id: Id, config: &crate::config::EngineConfig) -> Result<PrecourseAttempts>
where
    S: FactStore + ?Sized,
{
    Ok(PrecourseAttempts {
        current: store.quiz_attempts(student_id, config.current_precourse.quiz_id).await?,
        legacy: store.quiz_attempts(student_id, config.legacy_precourse.quiz_id).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course() -> Course {
        Course { id: 1, title: "Cert IV".into(), category_id: None, is_main_course: true }
    }

    fn lesson(id: Id, order: i32) -> Lesson {
        Lesson { id, course_id: 1, title: format!("L{id}"), order, has_work_placement: false }
    }

    fn topic(id: Id, lesson_id: Id, order: i32) -> Topic {
        Topic { id, course_id: 1, lesson_id, title: format!("T{id}"), order }
    }

    fn quiz(id: Id, topic_id: Id, lesson_id: Id, order: i32) -> Quiz {
        Quiz { id, course_id: 1, lesson_id, topic_id, title: format!("Q{id}"), order, has_checklist: false }
    }

    #[test]
    fn catalog_orders_children_and_skips_orphans() {
        let catalog = Catalog::new(
            course(),
            vec![lesson(2, 1), lesson(1, 0)],
            vec![topic(11, 1, 1), topic(10, 1, 0), topic(99, 42, 0)],
            vec![quiz(100, 10, 1, 0), quiz(101, 11, 1, 0), quiz(999, 77, 1, 0)],
        );
        assert_eq!(catalog.lessons.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(catalog.topics_of(1).iter().map(|t| t.id).collect::<Vec<_>>(), vec![10, 11]);
        assert!(catalog.quiz(999).is_none());
        assert!(!catalog.topics.values().flatten().any(|t| t.id == 99));
        let (l, t, q) = catalog.first_path().unwrap();
        assert_eq!((l.id, t.id, q.id), (1, 10, 100));
    }

    #[test]
    fn first_path_requires_zero_order() {
        let catalog = Catalog::new(course(), vec![lesson(1, 1)], vec![topic(10, 1, 0)], vec![quiz(100, 10, 1, 0)]);
        assert!(catalog.first_path().is_none());
    }

    #[test]
    fn latest_checklist_wins_by_id() {
        let event = |id, status| StudentActivity {
            id,
            user_id: 1,
            event: ActivityEvent::Checklist,
            attachable: Attachable::Quiz(5),
            status: Some(status),
            created_at: Utc::now(),
        };
        let index = ActivityIndex::new(vec![
            event(3, ChecklistStatus::NotSatisfactory),
            event(2, ChecklistStatus::Satisfactory),
        ]);
        assert_eq!(index.checklist_status(5), Some(ChecklistStatus::NotSatisfactory));
        assert_eq!(index.checklist_status(6), None);
        assert!(index.work_placement(5).is_none());
    }
}
