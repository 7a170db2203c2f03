//! Progress model - per-learner state over the content hierarchy.
//!
//! Rows are materialised lazily: a learner who never touched a lesson or
//! block has no row for it, and [`ProgressSnapshot`] hands out the default
//! `NotStarted` row instead.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::id::{ContentBlockId, CourseId, LearnerId, LessonId};
use crate::Time;

/// Status shared by enrollments, lessons and content blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    /// Never touched
    #[default]
    NotStarted,
    /// Touched, not done
    InProgress,
    /// Done; never reverts
    Completed,
}

impl ProgressStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "NOT_STARTED",
            ProgressStatus::InProgress => "IN_PROGRESS",
            ProgressStatus::Completed => "COMPLETED",
        }
    }

    /// Whether this status is `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self, ProgressStatus::Completed)
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown progress status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for ProgressStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(ProgressStatus::NotStarted),
            "IN_PROGRESS" => Ok(ProgressStatus::InProgress),
            "COMPLETED" => Ok(ProgressStatus::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A learner's participation in one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    /// Learner
    pub learner_id: LearnerId,

    /// Course
    pub course_id: CourseId,

    /// Enrollment status
    pub status: ProgressStatus,

    /// Cached roll-up: percentage of lessons completed (0-100)
    pub progress_percentage: u8,

    /// When the learner enrolled
    pub enrolled_at: Time,

    /// When the course was first completed
    pub completed_at: Option<Time>,

    /// Last progress activity
    pub last_accessed_at: Time,

    /// Compare-and-set token, bumped by every committed write
    #[serde(default)]
    pub revision: u64,
}

impl Enrollment {
    /// Create a fresh enrollment.
    pub fn new(learner_id: LearnerId, course_id: CourseId, now: Time) -> Self {
        Self {
            learner_id,
            course_id,
            status: ProgressStatus::NotStarted,
            progress_percentage: 0,
            enrolled_at: now,
            completed_at: None,
            last_accessed_at: now,
            revision: 0,
        }
    }
}

/// A learner's state for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    /// Learner
    pub learner_id: LearnerId,

    /// Lesson
    pub lesson_id: LessonId,

    /// Lesson status
    pub status: ProgressStatus,

    /// When the lesson was completed
    pub completed_at: Option<Time>,

    /// Last change
    pub updated_at: Option<Time>,
}

impl LessonProgress {
    /// The implicit row of a lesson the learner has not touched.
    pub fn not_started(learner_id: LearnerId, lesson_id: LessonId) -> Self {
        Self {
            learner_id,
            lesson_id,
            status: ProgressStatus::NotStarted,
            completed_at: None,
            updated_at: None,
        }
    }
}

/// A learner's state for one content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgress {
    /// Learner
    pub learner_id: LearnerId,

    /// Content block
    pub content_block_id: ContentBlockId,

    /// Block status
    pub status: ProgressStatus,

    /// Highest progress value reported (0-100)
    pub progress_value: Option<u8>,

    /// When the block was completed
    pub completed_at: Option<Time>,

    /// Last change
    pub updated_at: Option<Time>,
}

impl ContentProgress {
    /// The implicit row of a block the learner has not touched.
    pub fn not_started(learner_id: LearnerId, content_block_id: ContentBlockId) -> Self {
        Self {
            learner_id,
            content_block_id,
            status: ProgressStatus::NotStarted,
            progress_value: None,
            completed_at: None,
            updated_at: None,
        }
    }
}

/// Everything one learner has stored for one course.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Learner the snapshot belongs to
    pub learner_id: LearnerId,

    /// Course the snapshot covers
    pub course_id: CourseId,

    /// Enrollment, if the learner is enrolled
    pub enrollment: Option<Enrollment>,

    /// Materialised lesson rows
    pub lessons: HashMap<LessonId, LessonProgress>,

    /// Materialised content rows
    pub content: HashMap<ContentBlockId, ContentProgress>,
}

impl ProgressSnapshot {
    /// An empty snapshot.
    pub fn empty(learner_id: LearnerId, course_id: CourseId) -> Self {
        Self {
            learner_id,
            course_id,
            enrollment: None,
            lessons: HashMap::new(),
            content: HashMap::new(),
        }
    }

    /// Lesson row, or the default row when none is stored.
    pub fn lesson(&self, id: LessonId) -> LessonProgress {
        self.lessons
            .get(&id)
            .cloned()
            .unwrap_or_else(|| LessonProgress::not_started(self.learner_id.clone(), id))
    }

    /// Content row, or the default row when none is stored.
    pub fn content(&self, id: ContentBlockId) -> ContentProgress {
        self.content
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ContentProgress::not_started(self.learner_id.clone(), id))
    }

    /// Status of a lesson.
    pub fn lesson_status(&self, id: LessonId) -> ProgressStatus {
        self.lessons.get(&id).map(|p| p.status).unwrap_or_default()
    }

    /// Status of a content block.
    pub fn content_status(&self, id: ContentBlockId) -> ProgressStatus {
        self.content.get(&id).map(|p| p.status).unwrap_or_default()
    }
}

/// One logical update across all three progress levels.
///
/// Storage backends apply a write atomically, and only if the stored
/// enrollment still carries `expected_revision`.
#[derive(Debug, Clone)]
pub struct ProgressWrite {
    /// Learner
    pub learner_id: LearnerId,

    /// Course
    pub course_id: CourseId,

    /// Enrollment revision the write was planned against
    pub expected_revision: u64,

    /// Content rows to upsert
    pub content: Vec<ContentProgress>,

    /// Lesson rows to upsert
    pub lessons: Vec<LessonProgress>,

    /// New enrollment state
    pub enrollment: Enrollment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            ProgressStatus::NotStarted,
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ProgressStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<ProgressStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ProgressStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }

    #[test]
    fn test_snapshot_defaults_for_missing_rows() {
        let learner = LearnerId::new("ambassador-7");
        let snapshot = ProgressSnapshot::empty(learner.clone(), CourseId::new());

        let block = ContentBlockId::new();
        let row = snapshot.content(block);
        assert_eq!(row.status, ProgressStatus::NotStarted);
        assert_eq!(row.progress_value, None);
        assert_eq!(row.learner_id, learner);
        assert_eq!(snapshot.content_status(block), ProgressStatus::NotStarted);

        let lesson = LessonId::new();
        assert_eq!(snapshot.lesson(lesson).status, ProgressStatus::NotStarted);
        assert!(snapshot.lesson(lesson).completed_at.is_none());
    }

    #[test]
    fn test_new_enrollment_is_not_started() {
        let now = chrono::Utc::now();
        let enrollment = Enrollment::new(LearnerId::new("l1"), CourseId::new(), now);
        assert_eq!(enrollment.status, ProgressStatus::NotStarted);
        assert_eq!(enrollment.progress_percentage, 0);
        assert_eq!(enrollment.revision, 0);
        assert!(enrollment.completed_at.is_none());
    }
}
