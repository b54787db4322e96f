use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::facts::CourseFacts;
use crate::models::{Enrollment, EnrollmentStatus};
use crate::snapshot::{count_nodes, CourseDetails, NodeCounts};

/// Cached summary stored next to the snapshot tree.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct Percentage {
    #[serde(flatten)]
    pub counts: NodeCounts,
    pub actual: f64,
    pub expected: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    #[serde(rename = "ON SCHEDULE")]
    OnSchedule,
    #[serde(rename = "BEHIND SCHEDULE")]
    BehindSchedule,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "DELIST")]
    Delist,
}

impl ReportStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReportStatus::OnSchedule => "ON SCHEDULE",
            ReportStatus::BehindSchedule => "BEHIND SCHEDULE",
            ReportStatus::Completed => "COMPLETED",
            ReportStatus::Delist => "DELIST",
        }
    }
}

pub fn summarize(details: &CourseDetails, facts: &CourseFacts, config: &EngineConfig, now: DateTime<Utc>) -> Percentage {
    let counts = count_nodes(details);
    let floor = if config.is_main(&facts.catalog.course) { Some(config.onboarding_floor) } else { None };
    let actual = actual_percentage(&counts, details.completed, floor, facts.is_onboarded());
    let expected = expected_percentage(actual, facts.enrollment.as_ref(), now);
    Percentage { counts, actual, expected }
}

/// `floor` is the onboarding reservation for main courses, `None` otherwise.
pub fn actual_percentage(counts: &NodeCounts, course_completed: bool, floor: Option<f64>, onboarded: bool) -> f64 {
    if course_completed {
        return 100.0;
    }
    if counts.total == 0 || counts.processed == 0 {
        return 0.0;
    }
    let ratio = counts.processed as f64 / counts.total as f64 * 100.0;
    let value = match floor {
        Some(floor) => {
            let base = if onboarded { floor } else { 0.0 };
            base + ratio * (100.0 - floor) / 100.0
        }
        None => ratio,
    };
    round2(value.clamp(0.0, 100.0))
}

pub fn expected_percentage(actual: f64, enrollment: Option<&Enrollment>, now: DateTime<Utc>) -> f64 {
    if actual <= 0.0 {
        return 0.0;
    }
    match enrollment.and_then(|e| Some((e.course_start_at?, e.course_ends_at?))) {
        Some((start, end)) => pacing(start, end, now),
        None => 0.0,
    }
}

/// Linear share of calendar days elapsed between start and end.
pub fn pacing(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    if now < start {
        return 0.0;
    }
    if now >= end {
        return 100.0;
    }
    let total_days = (end.date_naive() - start.date_naive()).num_days();
    if total_days <= 0 {
        return 100.0;
    }
    let elapsed = (now.date_naive() - start.date_naive()).num_days();
    round2((elapsed as f64 / total_days as f64 * 100.0).clamp(0.0, 100.0))
}

pub fn report_status(
    percentage: &Percentage,
    enrollment: Option<&Enrollment>,
    now: DateTime<Utc>,
    gap_threshold: f64,
) -> ReportStatus {
    if enrollment.is_some_and(|e| e.status == EnrollmentStatus::Delist) {
        return ReportStatus::Delist;
    }
    if percentage.actual >= 100.0 {
        return if percentage.counts.outstanding() == 0 { ReportStatus::Completed } else { ReportStatus::OnSchedule };
    }
    let gap = percentage.expected - percentage.actual;
    let ended = enrollment
        .and_then(|e| e.course_ends_at)
        .is_some_and(|end| end < now);
    if gap > gap_threshold && ended {
        ReportStatus::BehindSchedule
    } else {
        ReportStatus::OnSchedule
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
