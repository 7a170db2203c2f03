//! Persisting side of the progress roll-up.
//!
//! Every update is load, plan, commit. The commit is a compare-and-set on
//! the enrollment revision, so a concurrent update for the same learner
//! and course makes one side reload and re-plan instead of overwriting.

use std::sync::Arc;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use learnpath_core::{
    ContentBlockId, ContentProgress, Course, CourseId, Enrollment, LearnerId, LessonId,
    LessonProgress, ProgressSnapshot, ProgressWrite, Time,
};
use learnpath_storage::{
    merge_content_row, merge_lesson_row, ContentStore, ProgressStore, StorageError,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::rollup::{plan_content_update, plan_reconciliation, PlanError, ProgressInput};

/// Result of a committed progress update.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressOutcome {
    /// Whether the update was committed
    pub success: bool,
    /// Enrollment after the commit
    pub enrollment: Enrollment,
    /// Lesson rows as stored after the commit
    pub lessons: Vec<LessonProgress>,
    /// Content rows as stored after the commit
    pub content: Vec<ContentProgress>,
    /// Lessons that became completed with this update
    pub newly_completed: Vec<LessonId>,
    /// Whether the course became completed with this update
    pub course_completed: bool,
}

impl ProgressOutcome {
    fn committed(before: &ProgressSnapshot, write: &ProgressWrite, enrollment: Enrollment) -> Self {
        // The snapshot matches the revision that was claimed, so merging
        // against it yields exactly what the store holds now.
        let content = write
            .content
            .iter()
            .map(|row| merge_content_row(before.content.get(&row.content_block_id), row))
            .collect();
        let lessons: Vec<LessonProgress> = write
            .lessons
            .iter()
            .map(|row| merge_lesson_row(before.lessons.get(&row.lesson_id), row))
            .collect();
        let newly_completed = lessons
            .iter()
            .filter(|row| row.status.is_completed() && !before.lesson_status(row.lesson_id).is_completed())
            .map(|row| row.lesson_id)
            .collect();
        let was_completed = before
            .enrollment
            .as_ref()
            .map(|e| e.status.is_completed())
            .unwrap_or(false);

        Self {
            success: true,
            course_completed: enrollment.status.is_completed() && !was_completed,
            enrollment,
            lessons,
            content,
            newly_completed,
        }
    }
}

/// Result of reconciling one enrollment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Stored roll-up already matched the content rows
    Consistent,
    /// Lesson rows or the enrollment were rewritten
    Repaired(ProgressOutcome),
}

/// Result of reconciling every enrollment of a course.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Course
    pub course_id: CourseId,
    /// Enrollments examined
    pub checked: usize,
    /// Learners whose roll-up was repaired
    pub repaired: Vec<LearnerId>,
    /// Learners that could not be reconciled, with the reason
    pub failed: Vec<(LearnerId, String)>,
}

/// Loads, plans and commits progress updates.
#[derive(Clone)]
pub struct ProgressAggregator {
    content: Arc<dyn ContentStore>,
    progress: Arc<dyn ProgressStore>,
    config: EngineConfig,
}

impl ProgressAggregator {
    /// Create an aggregator over the given stores.
    pub fn new(
        content: Arc<dyn ContentStore>,
        progress: Arc<dyn ProgressStore>,
        config: EngineConfig,
    ) -> Self {
        Self { content, progress, config }
    }

    pub(crate) fn progress_store(&self) -> &Arc<dyn ProgressStore> {
        &self.progress
    }

    pub(crate) async fn load_course(&self, id: CourseId) -> Result<Course> {
        self.content
            .load_course(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("course {}", id)))
    }

    pub(crate) async fn course_of_lesson(&self, id: LessonId) -> Result<Course> {
        let course_id = self
            .content
            .course_for_lesson(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("lesson {}", id)))?;
        self.load_course(course_id).await
    }

    pub(crate) async fn course_of_block(&self, id: ContentBlockId) -> Result<Course> {
        let course_id = self
            .content
            .course_for_content_block(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("content block {}", id)))?;
        self.load_course(course_id).await
    }

    /// Record a progress report for a content block and roll it up.
    pub async fn update_content_progress(
        &self,
        learner: &LearnerId,
        block_id: ContentBlockId,
        input: ProgressInput,
    ) -> Result<ProgressOutcome> {
        let course = self.course_of_block(block_id).await?;
        let outcome = self
            .commit_with_retry(learner, &course, |snapshot, now| {
                plan_content_update(&course, snapshot, block_id, &input, now).map(Some)
            })
            .await?
            .ok_or_else(|| not_enrolled(learner, course.id))?;

        log_completions(learner, &course, &outcome);
        Ok(outcome)
    }

    /// Recompute one learner's lesson rows and cached percentage from their
    /// content rows.
    pub async fn reconcile_enrollment(
        &self,
        learner: &LearnerId,
        course_id: CourseId,
    ) -> Result<ReconcileOutcome> {
        let course = self.load_course(course_id).await?;
        self.reconcile_in(learner, &course).await
    }

    /// Reconcile every enrollment of a course.
    ///
    /// A failure for one learner is recorded in the report and does not stop
    /// the others.
    pub async fn reconcile_course(&self, course_id: CourseId) -> Result<ReconcileReport> {
        let course = self.load_course(course_id).await?;
        let enrollments = self.progress.list_enrollments(course_id).await?;

        let mut report = ReconcileReport {
            course_id,
            ..Default::default()
        };
        for enrollment in enrollments {
            report.checked += 1;
            match self.reconcile_in(&enrollment.learner_id, &course).await {
                Ok(ReconcileOutcome::Consistent) => {}
                Ok(ReconcileOutcome::Repaired(_)) => report.repaired.push(enrollment.learner_id),
                Err(e) => {
                    warn!(learner = %enrollment.learner_id, course = %course_id, "Reconciliation failed: {}", e);
                    report.failed.push((enrollment.learner_id, e.to_string()));
                }
            }
        }

        info!(
            course = %course_id,
            checked = report.checked,
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "Reconciled course"
        );
        Ok(report)
    }

    async fn reconcile_in(&self, learner: &LearnerId, course: &Course) -> Result<ReconcileOutcome> {
        let outcome = self
            .commit_with_retry(learner, course, |snapshot, now| {
                if snapshot.enrollment.is_none() {
                    return Err(PlanError::NotEnrolled);
                }
                Ok(plan_reconciliation(course, snapshot, now))
            })
            .await?;

        Ok(match outcome {
            None => ReconcileOutcome::Consistent,
            Some(outcome) => {
                warn!(
                    learner = %learner,
                    course = %course.id,
                    lessons = outcome.lessons.len(),
                    percentage = outcome.enrollment.progress_percentage,
                    "Repaired drifted progress roll-up"
                );
                ReconcileOutcome::Repaired(outcome)
            }
        })
    }

    /// Run `plan` against a fresh snapshot and commit its write, retrying on
    /// revision conflicts. `Ok(None)` means the plan had nothing to write.
    pub(crate) async fn commit_with_retry<F>(
        &self,
        learner: &LearnerId,
        course: &Course,
        mut plan: F,
    ) -> Result<Option<ProgressOutcome>>
    where
        F: FnMut(&ProgressSnapshot, Time) -> std::result::Result<Option<ProgressWrite>, PlanError>,
    {
        let attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let snapshot = self.progress.load_snapshot(learner, course).await?;
            let Some(write) = plan(&snapshot, Utc::now())? else {
                return Ok(None);
            };

            debug!(
                learner = %learner,
                course = %course.id,
                revision = write.expected_revision,
                content_rows = write.content.len(),
                lesson_rows = write.lessons.len(),
                percentage = write.enrollment.progress_percentage,
                "Committing progress"
            );

            match self.progress.commit(&write).await {
                Ok(enrollment) => {
                    return Ok(Some(ProgressOutcome::committed(&snapshot, &write, enrollment)));
                }
                Err(StorageError::Conflict(reason)) => {
                    warn!(
                        learner = %learner,
                        course = %course.id,
                        attempt,
                        "Progress commit conflicted: {}",
                        reason
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::TransientStorage(format!(
            "progress commit for learner {} in course {} conflicted {} times",
            learner, course.id, attempts
        )))
    }
}

fn not_enrolled(learner: &LearnerId, course: CourseId) -> EngineError {
    EngineError::NotFound(format!("enrollment of learner {} in course {}", learner, course))
}

pub(crate) fn log_completions(learner: &LearnerId, course: &Course, outcome: &ProgressOutcome) {
    for lesson_id in &outcome.newly_completed {
        info!(learner = %learner, course = %course.id, lesson = %lesson_id, "Lesson completed");
    }
    if outcome.course_completed {
        info!(learner = %learner, course = %course.id, "Course completed");
    }
}
