use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::models::{Course, Id};

/// A fixed pseudo-course holding a single gating quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecourseAssessment {
    pub course_id: Id,
    pub quiz_id: Id,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub legacy_precourse: PrecourseAssessment,
    pub current_precourse: PrecourseAssessment,
    pub excluded_categories: BTreeSet<Id>,
    /// Enrollments starting on or after this date must use the current assessment.
    pub legacy_cutoff: Option<NaiveDate>,
    pub continuation_marker: String,
    pub onboarding_floor: f64,
    pub behind_schedule_gap: f64,
    pub save_retries: u32,
    pub batch_unit_timeout: Duration,
    pub batch_concurrency: usize,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<Id> {
            let raw = lookup(key).ok_or_else(|| EngineError::Config(format!("{key} not set")))?;
            parse(key, &raw)
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let excluded_categories = match optional("PRECOURSE_EXCLUDED_CATEGORIES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("PRECOURSE_EXCLUDED_CATEGORIES", s))
                .collect::<Result<BTreeSet<Id>>>()?,
            None => BTreeSet::new(),
        };
        let legacy_cutoff = match optional("PRECOURSE_LEGACY_CUTOFF") {
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                    .map_err(|e| EngineError::Config(format!("PRECOURSE_LEGACY_CUTOFF: {e}")))?,
            ),
            None => None,
        };

        let config = EngineConfig {
            legacy_precourse: PrecourseAssessment {
                course_id: required("PRECOURSE_LEGACY_COURSE_ID")?,
                quiz_id: required("PRECOURSE_LEGACY_QUIZ_ID")?,
            },
            current_precourse: PrecourseAssessment {
                course_id: required("PRECOURSE_CURRENT_COURSE_ID")?,
                quiz_id: required("PRECOURSE_CURRENT_QUIZ_ID")?,
            },
            excluded_categories,
            legacy_cutoff,
            continuation_marker: optional("CONTINUATION_MARKER").unwrap_or_else(|| "Semester 2".into()),
            onboarding_floor: optional_parsed(&optional, "ONBOARDING_FLOOR", 5.0)?,
            behind_schedule_gap: optional_parsed(&optional, "BEHIND_SCHEDULE_GAP", 30.0)?,
            save_retries: optional_parsed(&optional, "SAVE_RETRIES", 3)?,
            batch_unit_timeout: Duration::from_secs(optional_parsed(&optional, "BATCH_UNIT_TIMEOUT_SECS", 30)?),
            batch_concurrency: optional_parsed(&optional, "BATCH_CONCURRENCY", 4)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.legacy_precourse.course_id == self.current_precourse.course_id {
            return Err(EngineError::Config(
                "legacy and current pre-course assessments must be distinct courses".into(),
            ));
        }
        if !(0.0..100.0).contains(&self.onboarding_floor) {
            return Err(EngineError::Config("ONBOARDING_FLOOR must be within [0, 100)".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(EngineError::Config("BATCH_CONCURRENCY must be positive".into()));
        }
        Ok(())
    }

    /// True for the two pseudo-courses that exist without an enrollment.
    pub fn is_precourse(&self, course_id: Id) -> bool {
        course_id == self.legacy_precourse.course_id || course_id == self.current_precourse.course_id
    }

    pub fn is_precourse_quiz(&self, quiz_id: Id) -> bool {
        quiz_id == self.legacy_precourse.quiz_id || quiz_id == self.current_precourse.quiz_id
    }

    pub fn is_continuation(&self, course: &Course) -> bool {
        !self.continuation_marker.is_empty()
            && course.title.to_lowercase().contains(&self.continuation_marker.to_lowercase())
    }

    /// Main course as used by the percentage floor.
    pub fn is_main(&self, course: &Course) -> bool {
        course.is_main_course && !self.is_continuation(course)
    }

    /// Main course whose first topic is satisfied by the pre-course assessment.
    pub fn takes_precourse(&self, course: &Course) -> bool {
        self.is_main(course)
            && !self.is_precourse(course.id)
            && course
                .category_id
                .map_or(true, |category| !self.excluded_categories.contains(&category))
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn optional_parsed<T, F>(optional: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match optional(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        legacy_precourse: PrecourseAssessment { course_id: 900, quiz_id: 9001 },
        current_precourse: PrecourseAssessment { course_id: 901, quiz_id: 9011 },
        excluded_categories: BTreeSet::from([77]),
        legacy_cutoff: None,
        continuation_marker: "Semester 2".into(),
        onboarding_floor: 5.0,
        behind_schedule_gap: 30.0,
        save_retries: 3,
        batch_unit_timeout: Duration::from_secs(5),
        batch_concurrency: 2,
    }
}
