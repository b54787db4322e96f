//! In-process store holding every table in maps. Used by the test suite and
//! for embedding the engine without a database.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ProgressStore, SaveOutcome, StoredProgress};
use crate::error::Result;
use crate::facts::FactStore;
use crate::models::*;
use crate::projection::{AdminReport, TrainingPlan};

#[derive(Default)]
struct Tables {
    courses: BTreeMap<Id, Course>,
    lessons: BTreeMap<Id, Lesson>,
    topics: BTreeMap<Id, Topic>,
    quizzes: BTreeMap<Id, Quiz>,
    attempts: BTreeMap<Id, QuizAttempt>,
    competencies: BTreeMap<(Id, Id), Competency>,
    activities: Vec<StudentActivity>,
    unlocks: Vec<LessonUnlock>,
    enrollments: BTreeMap<(Id, Id), Enrollment>,
    students: BTreeMap<Id, Student>,
    progress: BTreeMap<(Id, Id), StoredProgress>,
    plans: BTreeMap<(Id, Id), TrainingPlan>,
    reports: BTreeMap<(Id, Id), AdminReport>,
    activity_log: Vec<ActivityLog>,
    next_competency_id: Id,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_course(&self, course: Course) {
        self.tables.write().courses.insert(course.id, course);
    }

    pub fn put_lesson(&self, lesson: Lesson) {
        self.tables.write().lessons.insert(lesson.id, lesson);
    }

    pub fn put_topic(&self, topic: Topic) {
        self.tables.write().topics.insert(topic.id, topic);
    }

    pub fn put_quiz(&self, quiz: Quiz) {
        self.tables.write().quizzes.insert(quiz.id, quiz);
    }

    pub fn put_attempt(&self, attempt: QuizAttempt) {
        self.tables.write().attempts.insert(attempt.id, attempt);
    }

    pub fn push_activity(&self, activity: StudentActivity) {
        self.tables.write().activities.push(activity);
    }

    pub fn push_unlock(&self, unlock: LessonUnlock) {
        self.tables.write().unlocks.push(unlock);
    }

    pub fn put_enrollment(&self, enrollment: Enrollment) {
        self.tables
            .write()
            .enrollments
            .insert((enrollment.user_id, enrollment.course_id), enrollment);
    }

    pub fn remove_enrollment(&self, user_id: Id, course_id: Id) {
        self.tables.write().enrollments.remove(&(user_id, course_id));
    }

    pub fn put_student(&self, student: Student) {
        self.tables.write().students.insert(student.id, student);
    }

    /// Write a raw progress row, bypassing version checks.
    pub fn put_raw_progress(&self, user_id: Id, course_id: Id, percentage: Value, details: Value) {
        let mut tables = self.tables.write();
        let version = tables.progress.get(&(user_id, course_id)).map_or(1, |p| p.version + 1);
        tables
            .progress
            .insert((user_id, course_id), StoredProgress { version, percentage, details });
    }

    pub fn admin_report(&self, user_id: Id, course_id: Id) -> Option<AdminReport> {
        self.tables.read().reports.get(&(user_id, course_id)).cloned()
    }

    pub fn activity_log(&self) -> Vec<ActivityLog> {
        self.tables.read().activity_log.clone()
    }

    pub fn competency(&self, user_id: Id, lesson_id: Id) -> Option<Competency> {
        self.tables.read().competencies.get(&(user_id, lesson_id)).cloned()
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn courses(&self) -> Result<Vec<Course>> {
        Ok(self.tables.read().courses.values().cloned().collect())
    }

    async fn course(&self, course_id: Id) -> Result<Option<Course>> {
        Ok(self.tables.read().courses.get(&course_id).cloned())
    }

    async fn lesson(&self, lesson_id: Id) -> Result<Option<Lesson>> {
        Ok(self.tables.read().lessons.get(&lesson_id).cloned())
    }

    async fn lessons(&self, course_id: Id) -> Result<Vec<Lesson>> {
        Ok(self.tables.read().lessons.values().filter(|l| l.course_id == course_id).cloned().collect())
    }

    async fn topics(&self, course_id: Id) -> Result<Vec<Topic>> {
        Ok(self.tables.read().topics.values().filter(|t| t.course_id == course_id).cloned().collect())
    }

    async fn quizzes(&self, course_id: Id) -> Result<Vec<Quiz>> {
        Ok(self.tables.read().quizzes.values().filter(|q| q.course_id == course_id).cloned().collect())
    }

    async fn attempt(&self, attempt_id: Id) -> Result<Option<QuizAttempt>> {
        Ok(self.tables.read().attempts.get(&attempt_id).cloned())
    }

    async fn course_attempts(&self, user_id: Id, course_id: Id) -> Result<Vec<QuizAttempt>> {
        Ok(self
            .tables
            .read()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn quiz_attempts(&self, user_id: Id, quiz_id: Id) -> Result<Vec<QuizAttempt>> {
        Ok(self
            .tables
            .read()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .cloned()
            .collect())
    }

    async fn competencies(&self, user_id: Id, course_id: Id) -> Result<Vec<Competency>> {
        Ok(self
            .tables
            .read()
            .competencies
            .values()
            .filter(|c| c.user_id == user_id && c.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn activities(&self, user_id: Id) -> Result<Vec<StudentActivity>> {
        Ok(self.tables.read().activities.iter().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn unlocks(&self, user_id: Id, course_id: Id) -> Result<Vec<LessonUnlock>> {
        Ok(self
            .tables
            .read()
            .unlocks
            .iter()
            .filter(|u| u.user_id == user_id && u.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn enrollment(&self, user_id: Id, course_id: Id) -> Result<Option<Enrollment>> {
        Ok(self.tables.read().enrollments.get(&(user_id, course_id)).cloned())
    }

    async fn enrollments(&self, user_id: Id) -> Result<Vec<Enrollment>> {
        Ok(self.tables.read().enrollments.values().filter(|e| e.user_id == user_id).cloned().collect())
    }

    async fn all_enrollments(&self) -> Result<Vec<Enrollment>> {
        Ok(self.tables.read().enrollments.values().cloned().collect())
    }

    async fn student(&self, user_id: Id) -> Result<Option<Student>> {
        Ok(self.tables.read().students.get(&user_id).cloned())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load_progress(&self, user_id: Id, course_id: Id) -> Result<Option<StoredProgress>> {
        Ok(self.tables.read().progress.get(&(user_id, course_id)).cloned())
    }

    async fn save_progress(
        &self,
        user_id: Id,
        course_id: Id,
        expected_version: Option<i64>,
        percentage: &Value,
        details: &Value,
    ) -> Result<SaveOutcome> {
        let mut tables = self.tables.write();
        let current = tables.progress.get(&(user_id, course_id)).map(|p| p.version);
        if current != expected_version {
            return Ok(SaveOutcome::Conflict);
        }
        let version = current.map_or(1, |v| v + 1);
        tables.progress.insert(
            (user_id, course_id),
            StoredProgress { version, percentage: percentage.clone(), details: details.clone() },
        );
        Ok(SaveOutcome::Saved { version })
    }

    async fn delete_progress(&self, user_id: Id, course_id: Id) -> Result<bool> {
        Ok(self.tables.write().progress.remove(&(user_id, course_id)).is_some())
    }

    async fn upsert_competency(&self, record: NewCompetency) -> Result<Competency> {
        let mut tables = self.tables.write();
        let key = (record.user_id, record.lesson_id);
        let id = match tables.competencies.get(&key).map(|c| c.id) {
            Some(id) => id,
            None => {
                tables.next_competency_id += 1;
                tables.next_competency_id
            }
        };
        let competency = Competency {
            id,
            user_id: record.user_id,
            course_id: record.course_id,
            lesson_id: record.lesson_id,
            is_competent: true,
            competent_on: Some(record.competent_on),
            course_start: record.course_start,
            lesson_start: record.lesson_start,
            lesson_end: record.lesson_end,
            notes: record.notes,
            param: record.param,
        };
        tables.competencies.insert(key, competency.clone());
        Ok(competency)
    }

    async fn save_training_plan(&self, plan: &TrainingPlan) -> Result<()> {
        self.tables.write().plans.insert((plan.user_id, plan.course.id), plan.clone());
        Ok(())
    }

    async fn load_training_plan(&self, user_id: Id, course_id: Id) -> Result<Option<TrainingPlan>> {
        Ok(self.tables.read().plans.get(&(user_id, course_id)).cloned())
    }

    async fn delete_training_plan(&self, user_id: Id, course_id: Id) -> Result<()> {
        self.tables.write().plans.remove(&(user_id, course_id));
        Ok(())
    }

    async fn save_admin_report(&self, row: &AdminReport) -> Result<()> {
        self.tables.write().reports.insert((row.user_id, row.course_id), row.clone());
        Ok(())
    }

    async fn delete_admin_report(&self, user_id: Id, course_id: Id) -> Result<()> {
        self.tables.write().reports.remove(&(user_id, course_id));
        Ok(())
    }

    async fn record_activity(&self, entry: ActivityLog) -> Result<()> {
        self.tables.write().activity_log.push(entry);
        Ok(())
    }
}
