#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use progress_engine::models::*;
use progress_engine::{Engine, EngineConfig, FixedClock, MemoryStore, ProgressStore};

pub const STUDENT: Id = 1;
pub const MAIN: Id = 1;
pub const ELECTIVE_A: Id = 2;
pub const ELECTIVE_B: Id = 3;
pub const LEGACY_COURSE: Id = 900;
pub const LEGACY_QUIZ: Id = 9001;
pub const CURRENT_COURSE: Id = 901;
pub const CURRENT_QUIZ: Id = 9011;
pub const EXCLUDED_CATEGORY: Id = 77;

pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::days(n)
}

pub fn config(overrides: &[(&str, &str)]) -> EngineConfig {
    let mut vars: HashMap<String, String> = [
        ("PRECOURSE_LEGACY_COURSE_ID", "900"),
        ("PRECOURSE_LEGACY_QUIZ_ID", "9001"),
        ("PRECOURSE_CURRENT_COURSE_ID", "901"),
        ("PRECOURSE_CURRENT_QUIZ_ID", "9011"),
        ("PRECOURSE_EXCLUDED_CATEGORIES", "77"),
        ("SAVE_RETRIES", "2"),
        ("BATCH_UNIT_TIMEOUT_SECS", "5"),
        ("BATCH_CONCURRENCY", "2"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    EngineConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
}

pub struct Fixture<S = MemoryStore> {
    pub store: Arc<S>,
    pub clock: FixedClock,
    pub engine: Arc<Engine<S>>,
}

impl Fixture<MemoryStore> {
    pub fn new() -> Self {
        Self::with_main_category(Some(5))
    }

    pub fn with_main_category(category: Option<Id>) -> Self {
        let store = Arc::new(MemoryStore::new());
        seed(&store, category);
        Self::over(store, config(&[]))
    }
}

impl<S: ProgressStore + 'static> Fixture<S> {
    pub fn over(store: Arc<S>, config: EngineConfig) -> Self {
        let clock = FixedClock::new(day(9));
        let engine = Arc::new(Engine::new(store.clone(), config, Arc::new(clock.clone())));
        Self { store, clock, engine }
    }
}

fn course(store: &MemoryStore, id: Id, title: &str, category: Option<Id>, main: bool) {
    store.put_course(Course { id, title: title.into(), category_id: category, is_main_course: main });
}

fn lesson(store: &MemoryStore, id: Id, course_id: Id, order: i32) {
    store.put_lesson(Lesson { id, course_id, title: format!("Lesson {id}"), order, has_work_placement: false });
}

fn topic(store: &MemoryStore, id: Id, lesson_id: Id, course_id: Id, order: i32) {
    store.put_topic(Topic { id, course_id, lesson_id, title: format!("Topic {id}"), order });
}

fn quiz(store: &MemoryStore, id: Id, topic_id: Id, lesson_id: Id, course_id: Id, order: i32, checklist: bool) {
    store.put_quiz(Quiz { id, course_id, lesson_id, topic_id, title: format!("Quiz {id}"), order, has_checklist: checklist });
}

/// Main course 1: lesson 10 (topic 100, quiz 1000) and lesson 11 (topic 110,
/// quizzes 1100 with checklist and 1101). Electives 2 and 3 with one quiz each.
/// Both pre-course pseudo-courses carry their single quiz.
pub fn seed(store: &MemoryStore, main_category: Option<Id>) {
    course(store, MAIN, "Certificate III in Individual Support", main_category, true);
    lesson(store, 10, MAIN, 0);
    topic(store, 100, 10, MAIN, 0);
    quiz(store, 1000, 100, 10, MAIN, 0, false);
    lesson(store, 11, MAIN, 1);
    topic(store, 110, 11, MAIN, 0);
    quiz(store, 1100, 110, 11, MAIN, 0, true);
    quiz(store, 1101, 110, 11, MAIN, 1, false);

    for (course_id, base) in [(ELECTIVE_A, 20), (ELECTIVE_B, 30)] {
        course(store, course_id, &format!("Elective {course_id}"), None, false);
        lesson(store, base, course_id, 0);
        topic(store, base * 10, base, course_id, 0);
        quiz(store, base * 100, base * 10, base, course_id, 0, false);
    }

    for (course_id, quiz_id) in [(LEGACY_COURSE, LEGACY_QUIZ), (CURRENT_COURSE, CURRENT_QUIZ)] {
        course(store, course_id, &format!("Pre-course {course_id}"), None, false);
        lesson(store, course_id * 10, course_id, 0);
        topic(store, course_id * 100, course_id * 10, course_id, 0);
        quiz(store, quiz_id, course_id * 100, course_id * 10, course_id, 0, false);
    }

    store.put_student(Student {
        id: STUDENT,
        first_name: "Alex".into(),
        last_name: "Morgan".into(),
        email: "alex@example.com".into(),
        company: Some("Bright Care".into()),
        leader: Some("Jordan".into()),
        trainer: Some("Casey".into()),
        onboarded_at: Some(day(0)),
    });
    for (id, course_id) in [(1, MAIN), (2, ELECTIVE_A), (3, ELECTIVE_B)] {
        enroll(store, id, course_id);
    }
}

pub fn enroll(store: &MemoryStore, id: Id, course_id: Id) {
    store.put_enrollment(Enrollment {
        id,
        user_id: STUDENT,
        course_id,
        status: EnrollmentStatus::Enrolled,
        course_start_at: Some(day(0)),
        course_ends_at: Some(day(30)),
    });
}

pub fn attempt(id: Id, course_id: Id, lesson_id: Id, topic_id: Id, quiz_id: Id, status: AttemptStatus, at: DateTime<Utc>) -> QuizAttempt {
    QuizAttempt {
        id,
        user_id: STUDENT,
        course_id,
        lesson_id,
        topic_id,
        quiz_id,
        attempt: 1,
        status,
        system_result: if status == AttemptStatus::Attempting { SystemResult::InProgress } else { SystemResult::Evaluated },
        submitted_at: (status != AttemptStatus::Attempting).then_some(at),
        accessed_at: Some(at),
        updated_at: at,
    }
}

pub fn checklist(id: Id, quiz_id: Id, status: ChecklistStatus) -> StudentActivity {
    StudentActivity {
        id,
        user_id: STUDENT,
        event: ActivityEvent::Checklist,
        attachable: Attachable::Quiz(quiz_id),
        status: Some(status),
        created_at: day(id),
    }
}
