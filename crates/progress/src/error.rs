//! Engine error taxonomy.

use learnpath_core::{CourseId, LearnerId};
use learnpath_storage::StorageError;

use crate::rollup::PlanError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
///
/// Authorization is the caller's job; no variant here models it.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing course, lesson, block or enrollment
    #[error("Not found: {0}")]
    NotFound(String),

    /// The learner already has an enrollment for the course
    #[error("Learner {learner} is already enrolled in course {course}")]
    AlreadyEnrolled {
        /// Learner
        learner: LearnerId,
        /// Course
        course: CourseId,
    },

    /// The operation is not allowed in the current progress state
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Persistence failed in a way that a retry may fix
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Persistence failed permanently (e.g. undecodable records)
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl EngineError {
    /// Whether the caller may retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientStorage(_))
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => EngineError::NotFound(what),
            e if e.is_transient() => EngineError::TransientStorage(e.to_string()),
            e => EngineError::Storage(e),
        }
    }
}

impl From<PlanError> for EngineError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::NotEnrolled => EngineError::NotFound("enrollment".to_string()),
            PlanError::UnknownBlock(id) => EngineError::NotFound(format!("content block {}", id)),
            PlanError::UnknownLesson(id) => EngineError::NotFound(format!("lesson {}", id)),
            PlanError::Incomplete { lesson_id, pending } => EngineError::PreconditionFailed(format!(
                "lesson {} has {} incomplete content block(s)",
                lesson_id,
                pending.len()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::{ContentBlockId, LessonId};

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            EngineError::from(StorageError::NotFound("enrollment".into())),
            EngineError::NotFound(_)
        ));

        let transient = EngineError::from(StorageError::Database("database is locked".into()));
        assert!(transient.is_retryable());

        let corrupt = EngineError::from(StorageError::Corrupt("bad id".into()));
        assert!(matches!(corrupt, EngineError::Storage(_)));
        assert!(!corrupt.is_retryable());
    }

    #[test]
    fn test_plan_error_mapping() {
        let lesson_id = LessonId::new();
        let err = EngineError::from(PlanError::Incomplete {
            lesson_id,
            pending: vec![ContentBlockId::new(), ContentBlockId::new()],
        });
        assert!(matches!(err, EngineError::PreconditionFailed(_)));
        assert!(err.to_string().contains("2 incomplete"));

        assert!(matches!(EngineError::from(PlanError::NotEnrolled), EngineError::NotFound(_)));
        assert!(matches!(
            EngineError::from(PlanError::UnknownLesson(lesson_id)),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_terminal_errors_not_retryable() {
        assert!(!EngineError::NotFound("lesson".into()).is_retryable());
        assert!(!EngineError::PreconditionFailed("incomplete".into()).is_retryable());
        let err = EngineError::AlreadyEnrolled {
            learner: LearnerId::new("coach-1"),
            course: CourseId::new(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("coach-1"));
    }
}
