//! Storage trait abstraction.

use async_trait::async_trait;
use learnpath_core::{
    ContentBlockId, ContentProgress, Course, CourseId, Enrollment, LearnerId, LessonId,
    LessonProgress, ProgressSnapshot, ProgressStatus, ProgressWrite,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique key or compare-and-set violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Io(_) | StorageError::Database(_) | StorageError::Conflict(_)
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Conflict(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Corrupt(e.to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

/// Read access to the authored content hierarchy.
///
/// Implementations return courses with every level already in canonical
/// order (see [`Course::sort_hierarchy`]).
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Load a course with its full module/lesson/block tree.
    async fn load_course(&self, id: CourseId) -> Result<Option<Course>>;

    /// Find the course that owns a lesson.
    async fn course_for_lesson(&self, id: LessonId) -> Result<Option<CourseId>>;

    /// Find the course that owns a content block.
    async fn course_for_content_block(&self, id: ContentBlockId) -> Result<Option<CourseId>>;
}

/// Durable per-learner progress state.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    // === Enrollment operations ===

    /// Load the enrollment for a learner and course.
    async fn load_enrollment(&self, learner: &LearnerId, course: CourseId) -> Result<Option<Enrollment>>;

    /// Insert a new enrollment. Fails with [`StorageError::Conflict`] if one exists.
    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<()>;

    /// List every enrollment in a course.
    async fn list_enrollments(&self, course: CourseId) -> Result<Vec<Enrollment>>;

    // === Progress rows ===

    /// Load all progress rows a learner has for a course.
    async fn load_snapshot(&self, learner: &LearnerId, course: &Course) -> Result<ProgressSnapshot>;

    /// Apply a write to all three levels atomically.
    ///
    /// The write is rejected with [`StorageError::Conflict`] when the stored
    /// enrollment revision differs from `expected_revision`. Returns the
    /// enrollment as stored, with its new revision.
    async fn commit(&self, write: &ProgressWrite) -> Result<Enrollment>;
}

/// Merge an incoming content row into the stored one.
///
/// The progress value only grows and a completed block stays completed,
/// whatever order writes arrive in.
pub fn merge_content_row(stored: Option<&ContentProgress>, incoming: &ContentProgress) -> ContentProgress {
    let Some(stored) = stored else {
        return incoming.clone();
    };

    let progress_value = match (stored.progress_value, incoming.progress_value) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    ContentProgress {
        learner_id: incoming.learner_id.clone(),
        content_block_id: incoming.content_block_id,
        status: merge_status(stored.status, incoming.status),
        progress_value,
        completed_at: stored.completed_at.or(incoming.completed_at),
        updated_at: incoming.updated_at.or(stored.updated_at),
    }
}

/// Merge an incoming lesson row into the stored one.
pub fn merge_lesson_row(stored: Option<&LessonProgress>, incoming: &LessonProgress) -> LessonProgress {
    let Some(stored) = stored else {
        return incoming.clone();
    };

    LessonProgress {
        learner_id: incoming.learner_id.clone(),
        lesson_id: incoming.lesson_id,
        status: merge_status(stored.status, incoming.status),
        completed_at: stored.completed_at.or(incoming.completed_at),
        updated_at: incoming.updated_at.or(stored.updated_at),
    }
}

fn merge_status(stored: ProgressStatus, incoming: ProgressStatus) -> ProgressStatus {
    match (stored, incoming) {
        (ProgressStatus::Completed, _) | (_, ProgressStatus::Completed) => ProgressStatus::Completed,
        (ProgressStatus::InProgress, _) | (_, ProgressStatus::InProgress) => ProgressStatus::InProgress,
        _ => ProgressStatus::NotStarted,
    }
}
