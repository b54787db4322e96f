use thiserror::Error;

use crate::models::Id;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: Id },
    #[error("snapshot for student {student_id} course {course_id} changed concurrently")]
    Conflict { student_id: Id, course_id: Id },
    #[error("unit exceeded {seconds}s")]
    Timeout { seconds: u64 },
    #[error("catalog ordering contract violated: {0}")]
    OrderingContract(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn not_found(what: &'static str, id: Id) -> Self {
        EngineError::NotFound { what, id }
    }

    /// Whether a batch caller should schedule the unit again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Database(_) | EngineError::Conflict { .. } | EngineError::Timeout { .. }
        )
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        assert!(EngineError::Conflict { student_id: 1, course_id: 2 }.is_retryable());
        assert!(EngineError::Timeout { seconds: 30 }.is_retryable());
        assert!(!EngineError::not_found("course", 7).is_retryable());
        assert!(!EngineError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn not_found_message_names_the_record() {
        assert_eq!(EngineError::not_found("lesson", 12).to_string(), "lesson 12 not found");
    }
}
