//! The engine facade: every operation the outside world calls.

use std::future::Future;
use std::sync::Arc;
use serde::Serialize;
use tracing::debug;
use learnpath_core::{
    ContentBlock, ContentBlockId, ContentProgress, Course, CourseId, Enrollment, LearnerId,
    Lesson, LessonId, LessonProgress,
};
use learnpath_storage::{ContentStore, ProgressStore};

use crate::aggregator::{ProgressAggregator, ProgressOutcome, ReconcileOutcome, ReconcileReport};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::lifecycle::EnrollmentManager;
use crate::navigation::{resolve_navigation, LessonLink, LessonNavigation, NavigationIndex};
use crate::rollup::{course_rollup, CourseRollup, ProgressInput};

/// A course as seen by one learner.
#[derive(Debug, Clone, Serialize)]
pub struct CourseView {
    /// Full hierarchy
    pub course: Course,
    /// The learner's enrollment, if any
    pub enrollment: Option<Enrollment>,
    /// Roll-up of the learner's progress
    pub rollup: CourseRollup,
    /// First lesson not completed yet
    pub resume_lesson: Option<LessonLink>,
}

/// A content block with the learner's progress on it.
#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    /// Content block
    pub block: ContentBlock,
    /// Progress, `NotStarted` when never touched
    pub progress: ContentProgress,
}

/// A lesson as seen by one learner.
#[derive(Debug, Clone, Serialize)]
pub struct LessonView {
    /// Owning course
    pub course_id: CourseId,
    /// Lesson metadata
    pub lesson: Lesson,
    /// Progress on the lesson
    pub lesson_progress: LessonProgress,
    /// Blocks in order, each with its progress
    pub blocks: Vec<BlockView>,
    /// Previous and next lessons
    pub navigation: LessonNavigation,
}

/// Learning progress engine.
///
/// Stateless between calls; all state lives in the stores, so one engine
/// can be shared across request handlers.
#[derive(Clone)]
pub struct LearningEngine {
    content: Arc<dyn ContentStore>,
    progress: Arc<dyn ProgressStore>,
    config: EngineConfig,
    aggregator: ProgressAggregator,
    lifecycle: EnrollmentManager,
}

impl LearningEngine {
    /// Create an engine with the default configuration.
    pub fn new(content: Arc<dyn ContentStore>, progress: Arc<dyn ProgressStore>) -> Self {
        let config = EngineConfig::default();
        let aggregator = ProgressAggregator::new(content.clone(), progress.clone(), config.clone());
        let lifecycle = EnrollmentManager::new(aggregator.clone(), config.reenroll_policy);
        Self {
            content,
            progress,
            config,
            aggregator,
            lifecycle,
        }
    }

    /// Set custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.aggregator = ProgressAggregator::new(
            self.content.clone(),
            self.progress.clone(),
            config.clone(),
        );
        self.lifecycle = EnrollmentManager::new(self.aggregator.clone(), config.reenroll_policy);
        self.config = config;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enroll a learner in a course.
    pub async fn enroll(&self, learner: &LearnerId, course_id: CourseId) -> Result<Enrollment> {
        self.bounded(self.lifecycle.enroll(learner, course_id)).await
    }

    /// The course hierarchy with the learner's progress rolled up.
    ///
    /// Works without an enrollment; everything then reads as not started.
    pub async fn get_course_for_learner(
        &self,
        learner: &LearnerId,
        course_id: CourseId,
    ) -> Result<CourseView> {
        self.bounded(async {
            let course = self.aggregator.load_course(course_id).await?;
            let snapshot = self.progress.load_snapshot(learner, &course).await?;
            let rollup = course_rollup(&course, &snapshot);
            let resume_lesson = NavigationIndex::build(&course)
                .next_incomplete(&rollup)
                .cloned();

            debug!(
                learner = %learner,
                course = %course_id,
                percentage = rollup.percentage,
                "Loaded course view"
            );
            Ok::<_, EngineError>(CourseView {
                course,
                enrollment: snapshot.enrollment,
                rollup,
                resume_lesson,
            })
        })
        .await
    }

    /// A lesson's blocks with the learner's progress and its neighbours.
    pub async fn get_lesson_content(
        &self,
        learner: &LearnerId,
        lesson_id: LessonId,
    ) -> Result<LessonView> {
        self.bounded(async {
            let course = self.aggregator.course_of_lesson(lesson_id).await?;
            let snapshot = self.progress.load_snapshot(learner, &course).await?;
            let lesson = course
                .lesson(lesson_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;
            let navigation = resolve_navigation(&course, lesson_id)
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;

            let blocks = lesson
                .content_blocks
                .iter()
                .map(|block| BlockView {
                    block: block.clone(),
                    progress: snapshot.content(block.id),
                })
                .collect();

            Ok::<_, EngineError>(LessonView {
                course_id: course.id,
                lesson_progress: snapshot.lesson(lesson_id),
                lesson,
                blocks,
                navigation,
            })
        })
        .await
    }

    /// Record progress on a content block.
    ///
    /// `progress_value` is clamped to 0-100 and never lowers the stored
    /// value. With neither argument the call records access only.
    pub async fn update_content_progress(
        &self,
        learner: &LearnerId,
        block_id: ContentBlockId,
        progress_value: Option<i64>,
        force_complete: Option<bool>,
    ) -> Result<ProgressOutcome> {
        let input = ProgressInput {
            progress_value,
            force_complete: force_complete.unwrap_or(false),
        };
        self.bounded(self.aggregator.update_content_progress(learner, block_id, input))
            .await
    }

    /// Mark a lesson complete; every block must already be completed.
    pub async fn mark_lesson_complete(
        &self,
        learner: &LearnerId,
        lesson_id: LessonId,
    ) -> Result<ProgressOutcome> {
        self.bounded(self.lifecycle.mark_lesson_complete(learner, lesson_id))
            .await
    }

    /// Repair one learner's roll-up from their content rows.
    pub async fn reconcile_enrollment(
        &self,
        learner: &LearnerId,
        course_id: CourseId,
    ) -> Result<ReconcileOutcome> {
        self.bounded(self.aggregator.reconcile_enrollment(learner, course_id))
            .await
    }

    /// Repair the roll-up of every enrollment in a course.
    ///
    /// Not bounded by the operation timeout; its duration grows with the
    /// number of enrollments.
    pub async fn reconcile_course(&self, course_id: CourseId) -> Result<ReconcileReport> {
        self.aggregator.reconcile_course(course_id).await
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.operation_timeout() {
            Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
                EngineError::TransientStorage(format!("operation timed out after {:?}", limit))
            })?,
            None => op.await,
        }
    }
}
