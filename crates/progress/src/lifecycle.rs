//! Enrollment lifecycle: creating enrollments and explicit lesson completion.

use chrono::Utc;
use tracing::info;
use learnpath_core::{CourseId, Enrollment, LearnerId, LessonId};
use learnpath_storage::StorageError;

use crate::aggregator::{log_completions, ProgressAggregator, ProgressOutcome};
use crate::config::ReenrollPolicy;
use crate::error::{EngineError, Result};
use crate::rollup::plan_lesson_completion;

/// Creates enrollments and applies explicit lesson completion.
#[derive(Clone)]
pub struct EnrollmentManager {
    aggregator: ProgressAggregator,
    policy: ReenrollPolicy,
}

impl EnrollmentManager {
    /// Create a manager sharing the aggregator's stores.
    pub fn new(aggregator: ProgressAggregator, policy: ReenrollPolicy) -> Self {
        Self { aggregator, policy }
    }

    /// Enroll a learner in a course.
    ///
    /// An existing enrollment is handled by the configured
    /// [`ReenrollPolicy`], including when a concurrent call created it first.
    pub async fn enroll(&self, learner: &LearnerId, course_id: CourseId) -> Result<Enrollment> {
        self.aggregator.load_course(course_id).await?;
        let store = self.aggregator.progress_store();

        if let Some(existing) = store.load_enrollment(learner, course_id).await? {
            return self.existing(existing);
        }

        let enrollment = Enrollment::new(learner.clone(), course_id, Utc::now());
        match store.create_enrollment(&enrollment).await {
            Ok(()) => {
                info!(learner = %learner, course = %course_id, "Learner enrolled");
                Ok(enrollment)
            }
            Err(StorageError::Conflict(_)) => {
                let existing = store.load_enrollment(learner, course_id).await?.ok_or_else(|| {
                    EngineError::TransientStorage(format!(
                        "enrollment of learner {} in course {} vanished after a conflict",
                        learner, course_id
                    ))
                })?;
                self.existing(existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn existing(&self, existing: Enrollment) -> Result<Enrollment> {
        match self.policy {
            ReenrollPolicy::Reject => Err(EngineError::AlreadyEnrolled {
                learner: existing.learner_id,
                course: existing.course_id,
            }),
            ReenrollPolicy::ReturnExisting => Ok(existing),
        }
    }

    /// Mark a lesson complete on the learner's explicit action.
    ///
    /// Fails with `PreconditionFailed`, writing nothing, while any content
    /// block of the lesson is not completed.
    pub async fn mark_lesson_complete(
        &self,
        learner: &LearnerId,
        lesson_id: LessonId,
    ) -> Result<ProgressOutcome> {
        let course = self.aggregator.course_of_lesson(lesson_id).await?;
        let outcome = self
            .aggregator
            .commit_with_retry(learner, &course, |snapshot, now| {
                plan_lesson_completion(&course, snapshot, lesson_id, now).map(Some)
            })
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "enrollment of learner {} in course {}",
                    learner, course.id
                ))
            })?;

        log_completions(learner, &course, &outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use learnpath_core::ProgressStatus;
    use learnpath_storage::{MemoryStorage, ProgressStore};
    use crate::config::EngineConfig;
    use crate::fixtures;
    use crate::rollup::ProgressInput;

    async fn manager(course: &learnpath_core::Course, policy: ReenrollPolicy) -> (EnrollmentManager, MemoryStorage) {
        let storage = MemoryStorage::new();
        storage.save_course(course).await.unwrap();
        let aggregator = ProgressAggregator::new(
            Arc::new(storage.clone()),
            Arc::new(storage.clone()),
            EngineConfig::default(),
        );
        (EnrollmentManager::new(aggregator, policy), storage)
    }

    #[tokio::test]
    async fn test_enroll_creates_not_started() {
        let course = fixtures::video_course(1, 2, 90);
        let (manager, _) = manager(&course, ReenrollPolicy::Reject).await;

        let enrollment = manager.enroll(&fixtures::learner(), course.id).await.unwrap();
        assert_eq!(enrollment.status, ProgressStatus::NotStarted);
        assert_eq!(enrollment.progress_percentage, 0);
        assert!(enrollment.completed_at.is_none());
        assert_eq!(enrollment.revision, 0);
    }

    #[tokio::test]
    async fn test_reenroll_rejected_by_default() {
        let course = fixtures::video_course(1, 1, 90);
        let (manager, _) = manager(&course, ReenrollPolicy::Reject).await;
        let learner = fixtures::learner();

        manager.enroll(&learner, course.id).await.unwrap();
        let err = manager.enroll(&learner, course.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyEnrolled { .. }));
    }

    #[tokio::test]
    async fn test_reenroll_returns_existing() {
        let course = fixtures::video_course(1, 2, 90);
        let (manager, _) = manager(&course, ReenrollPolicy::ReturnExisting).await;
        let learner = fixtures::learner();
        let lessons = fixtures::lesson_blocks(&course);

        manager.enroll(&learner, course.id).await.unwrap();
        manager
            .aggregator
            .update_content_progress(&learner, lessons[0].1[0], ProgressInput::value(100))
            .await
            .unwrap();

        let again = manager.enroll(&learner, course.id).await.unwrap();
        assert_eq!(again.progress_percentage, 50);
        assert_eq!(again.status, ProgressStatus::InProgress);
    }

    #[tokio::test]
    async fn test_enroll_unknown_course() {
        let course = fixtures::video_course(1, 1, 90);
        let (manager, _) = manager(&course, ReenrollPolicy::Reject).await;
        let err = manager.enroll(&fixtures::learner(), CourseId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_enroll_single_row() {
        let course = fixtures::video_course(1, 1, 90);
        let (manager, storage) = manager(&course, ReenrollPolicy::ReturnExisting).await;
        let learner = fixtures::learner();

        let (a, b) = tokio::join!(
            manager.enroll(&learner, course.id),
            manager.enroll(&learner, course.id)
        );
        assert_eq!(a.unwrap().enrolled_at, b.unwrap().enrolled_at);
        assert_eq!(storage.list_enrollments(course.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_lesson_complete_precondition() {
        let course = fixtures::course(vec![vec![vec![fixtures::video(Some(90)), fixtures::text()]]]);
        let (lesson_id, blocks) = fixtures::lesson_blocks(&course)[0].clone();
        let (manager, storage) = manager(&course, ReenrollPolicy::Reject).await;
        let learner = fixtures::learner();
        manager.enroll(&learner, course.id).await.unwrap();

        manager
            .aggregator
            .update_content_progress(&learner, blocks[0], ProgressInput::value(50))
            .await
            .unwrap();
        let before = storage.load_snapshot(&learner, &course).await.unwrap();

        let err = manager.mark_lesson_complete(&learner, lesson_id).await.unwrap_err();
        assert!(matches!(err, EngineError::PreconditionFailed(_)));

        let after = storage.load_snapshot(&learner, &course).await.unwrap();
        assert_eq!(after.lesson(lesson_id), before.lesson(lesson_id));
        assert_eq!(after.enrollment, before.enrollment);
    }

    #[tokio::test]
    async fn test_mark_blockless_lesson_complete() {
        let course = fixtures::course(vec![vec![vec![], vec![fixtures::text()]]]);
        let (lesson_id, _) = fixtures::lesson_blocks(&course)[0].clone();
        let (manager, _) = manager(&course, ReenrollPolicy::Reject).await;
        let learner = fixtures::learner();
        manager.enroll(&learner, course.id).await.unwrap();

        let outcome = manager.mark_lesson_complete(&learner, lesson_id).await.unwrap();
        assert_eq!(outcome.newly_completed, vec![lesson_id]);
        assert_eq!(outcome.enrollment.progress_percentage, 50);

        let again = manager.mark_lesson_complete(&learner, lesson_id).await.unwrap();
        assert!(again.newly_completed.is_empty());
        assert_eq!(again.lessons[0].completed_at, outcome.lessons[0].completed_at);
    }

    #[tokio::test]
    async fn test_mark_lesson_complete_requires_enrollment() {
        let course = fixtures::video_course(1, 1, 90);
        let lesson_id = fixtures::lesson_blocks(&course)[0].0;
        let (manager, _) = manager(&course, ReenrollPolicy::Reject).await;
        let err = manager.mark_lesson_complete(&fixtures::learner(), lesson_id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
