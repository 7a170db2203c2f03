//! Pure roll-up of progress from content blocks to lessons, modules and the
//! course.
//!
//! Nothing here touches storage. Every function works on a
//! [`ProgressSnapshot`] and returns the rows that should be persisted, so the
//! persisting side only has to load, plan and commit.
//!
//! Rules:
//! - a content block is completed once its progress value reaches the
//!   block's threshold, or when completion is signalled explicitly;
//! - a lesson is completed when all of its blocks are completed;
//! - the enrollment percentage is `round_half_up(100 * completed / total)`
//!   over the lessons of the whole course;
//! - nothing that reached `Completed` ever goes back.

use serde::Serialize;
use learnpath_core::{
    ContentBlock, ContentBlockId, ContentProgress, Course, Enrollment, Lesson, LessonId,
    LessonProgress, ModuleId, ProgressSnapshot, ProgressStatus, ProgressWrite, Time,
};

/// A progress report for one content block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressInput {
    /// Reported progress (e.g. video watch percentage); clamped to 0-100
    pub progress_value: Option<i64>,
    /// Mark the block done regardless of its progress value
    pub force_complete: bool,
}

impl ProgressInput {
    /// A progress value report.
    pub fn value(progress_value: i64) -> Self {
        Self { progress_value: Some(progress_value), force_complete: false }
    }

    /// An explicit completion signal.
    pub fn complete() -> Self {
        Self { progress_value: None, force_complete: true }
    }

    /// The learner opened the block without reporting progress.
    pub fn access() -> Self {
        Self::default()
    }
}

/// Roll-up of one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonRollup {
    /// Lesson
    pub lesson_id: LessonId,
    /// Owning module
    pub module_id: ModuleId,
    /// 1-based position in the course
    pub position: usize,
    /// Derived status
    pub status: ProgressStatus,
    /// Completed content blocks
    pub completed_blocks: usize,
    /// Content blocks in the lesson
    pub total_blocks: usize,
}

/// Roll-up of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRollup {
    /// Module
    pub module_id: ModuleId,
    /// Derived status
    pub status: ProgressStatus,
    /// Completed lessons
    pub completed_lessons: usize,
    /// Lessons in the module
    pub total_lessons: usize,
    /// Rounded completion percentage
    pub percentage: u8,
}

/// Roll-up of a whole course for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseRollup {
    /// Per-lesson roll-up in course order
    pub lessons: Vec<LessonRollup>,
    /// Per-module roll-up in course order
    pub modules: Vec<ModuleRollup>,
    /// Completed lessons across the course
    pub completed_lessons: usize,
    /// Lessons across the course
    pub total_lessons: usize,
    /// Rounded completion percentage
    pub percentage: u8,
    /// Whether the learner has any recorded activity in the course
    pub touched: bool,
}

impl CourseRollup {
    /// All lessons completed (an empty course never is).
    pub fn is_complete(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons == self.total_lessons
    }

    /// Roll-up of a single lesson.
    pub fn lesson(&self, id: LessonId) -> Option<&LessonRollup> {
        self.lessons.iter().find(|l| l.lesson_id == id)
    }
}

/// Why a write could not be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The snapshot carries no enrollment
    NotEnrolled,
    /// The block is not part of the course
    UnknownBlock(ContentBlockId),
    /// The lesson is not part of the course
    UnknownLesson(LessonId),
    /// Some blocks of the lesson are not completed yet
    Incomplete {
        /// Lesson
        lesson_id: LessonId,
        /// Blocks still outstanding
        pending: Vec<ContentBlockId>,
    },
}

/// Clamp a reported progress value into 0-100.
pub fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// `round(100 * completed / total)` with halves rounded up, in integers.
pub fn round_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}

/// Apply a progress report to a content row.
///
/// The progress value is max-merged, so re-watching from the start or an
/// out-of-order report never lowers it.
pub fn merge_content(
    existing: &ContentProgress,
    block: &ContentBlock,
    input: &ProgressInput,
    now: Time,
) -> ContentProgress {
    let mut row = existing.clone();

    if input.force_complete {
        row.status = ProgressStatus::Completed;
        row.progress_value = Some(100);
    } else if let Some(reported) = input.progress_value {
        let reported = clamp_progress(reported);
        let merged = row.progress_value.map_or(reported, |stored| stored.max(reported));
        row.progress_value = Some(merged);
        if !row.status.is_completed() {
            row.status = if merged >= block.effective_threshold() {
                ProgressStatus::Completed
            } else {
                ProgressStatus::InProgress
            };
        }
    } else if row.status == ProgressStatus::NotStarted {
        row.status = ProgressStatus::InProgress;
    }

    if row.status.is_completed() && row.completed_at.is_none() {
        row.completed_at = Some(now);
    }
    row.updated_at = Some(now);
    row
}

/// Whether a lesson counts as completed.
///
/// A lesson without blocks has nothing to derive from; it completes only
/// when marked complete explicitly.
pub fn lesson_is_complete(lesson: &Lesson, snapshot: &ProgressSnapshot) -> bool {
    if lesson.content_blocks.is_empty() {
        return snapshot.lesson_status(lesson.id).is_completed();
    }
    lesson
        .content_blocks
        .iter()
        .all(|block| snapshot.content_status(block.id).is_completed())
}

fn lesson_touched(lesson: &Lesson, snapshot: &ProgressSnapshot) -> bool {
    lesson
        .content_blocks
        .iter()
        .any(|block| snapshot.content_status(block.id) != ProgressStatus::NotStarted)
}

/// Recompute a lesson row from its blocks.
pub fn derive_lesson(lesson: &Lesson, snapshot: &ProgressSnapshot, now: Time) -> LessonProgress {
    let mut row = snapshot.lesson(lesson.id);
    let derived = if lesson_is_complete(lesson, snapshot) {
        ProgressStatus::Completed
    } else if lesson_touched(lesson, snapshot) {
        ProgressStatus::InProgress
    } else {
        row.status
    };

    if !row.status.is_completed() && derived != row.status {
        row.status = derived;
        row.updated_at = Some(now);
    }
    if row.status.is_completed() && row.completed_at.is_none() {
        row.completed_at = Some(now);
        row.updated_at = Some(now);
    }
    row
}

fn lesson_changed(stored: &LessonProgress, derived: &LessonProgress) -> bool {
    stored.status != derived.status || stored.completed_at != derived.completed_at
}

/// Roll up a learner's snapshot over the whole course.
pub fn course_rollup(course: &Course, snapshot: &ProgressSnapshot) -> CourseRollup {
    let mut lessons = Vec::with_capacity(course.total_lessons());
    let mut modules = Vec::with_capacity(course.modules.len());
    let mut position = 0;

    for module in &course.modules {
        let mut module_completed = 0;
        let mut module_touched = false;

        for lesson in &module.lessons {
            position += 1;
            let complete = lesson_is_complete(lesson, snapshot);
            let status = if complete {
                ProgressStatus::Completed
            } else if lesson_touched(lesson, snapshot)
                || snapshot.lesson_status(lesson.id) != ProgressStatus::NotStarted
            {
                ProgressStatus::InProgress
            } else {
                ProgressStatus::NotStarted
            };
            if complete {
                module_completed += 1;
            }
            module_touched |= status != ProgressStatus::NotStarted;

            lessons.push(LessonRollup {
                lesson_id: lesson.id,
                module_id: module.id,
                position,
                status,
                completed_blocks: lesson
                    .content_blocks
                    .iter()
                    .filter(|b| snapshot.content_status(b.id).is_completed())
                    .count(),
                total_blocks: lesson.content_blocks.len(),
            });
        }

        let total = module.lessons.len();
        let status = if total > 0 && module_completed == total {
            ProgressStatus::Completed
        } else if module_touched {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::NotStarted
        };
        modules.push(ModuleRollup {
            module_id: module.id,
            status,
            completed_lessons: module_completed,
            total_lessons: total,
            percentage: round_percentage(module_completed, total),
        });
    }

    let completed_lessons = lessons
        .iter()
        .filter(|l| l.status == ProgressStatus::Completed)
        .count();
    let total_lessons = lessons.len();
    let touched = lessons.iter().any(|l| l.status != ProgressStatus::NotStarted)
        || snapshot
            .content
            .values()
            .any(|c| c.status != ProgressStatus::NotStarted);

    CourseRollup {
        lessons,
        modules,
        completed_lessons,
        total_lessons,
        percentage: round_percentage(completed_lessons, total_lessons),
        touched,
    }
}

/// Move an enrollment forward to match a roll-up.
///
/// `Completed` is sticky and `completed_at` is stamped only on the
/// transition into it. `last_accessed_at` is left to the caller.
pub fn advance_enrollment(prev: &Enrollment, rollup: &CourseRollup, now: Time) -> Enrollment {
    let mut next = prev.clone();
    next.progress_percentage = rollup.percentage;

    match prev.status {
        ProgressStatus::Completed => {}
        _ if rollup.is_complete() => {
            next.status = ProgressStatus::Completed;
            next.completed_at = prev.completed_at.or(Some(now));
        }
        _ if rollup.touched || rollup.percentage > 0 => {
            next.status = ProgressStatus::InProgress;
        }
        _ => {}
    }

    next
}

/// Plan the write for a content progress report.
pub fn plan_content_update(
    course: &Course,
    snapshot: &ProgressSnapshot,
    block_id: ContentBlockId,
    input: &ProgressInput,
    now: Time,
) -> Result<ProgressWrite, PlanError> {
    let enrollment = snapshot.enrollment.as_ref().ok_or(PlanError::NotEnrolled)?;
    let (lesson, block) = course
        .find_block(block_id)
        .ok_or(PlanError::UnknownBlock(block_id))?;

    let content = merge_content(&snapshot.content(block_id), block, input, now);

    let mut next = snapshot.clone();
    next.content.insert(block_id, content.clone());
    let lesson_row = derive_lesson(lesson, &next, now);
    next.lessons.insert(lesson.id, lesson_row.clone());

    let rollup = course_rollup(course, &next);
    let mut enrollment_next = advance_enrollment(enrollment, &rollup, now);
    enrollment_next.last_accessed_at = now;

    Ok(ProgressWrite {
        learner_id: snapshot.learner_id.clone(),
        course_id: course.id,
        expected_revision: enrollment.revision,
        content: vec![content],
        lessons: vec![lesson_row],
        enrollment: enrollment_next,
    })
}

/// Plan the write for an explicit "lesson complete" action.
///
/// Fails with [`PlanError::Incomplete`] while any block of the lesson is
/// not completed.
pub fn plan_lesson_completion(
    course: &Course,
    snapshot: &ProgressSnapshot,
    lesson_id: LessonId,
    now: Time,
) -> Result<ProgressWrite, PlanError> {
    let enrollment = snapshot.enrollment.as_ref().ok_or(PlanError::NotEnrolled)?;
    let lesson = course
        .lesson(lesson_id)
        .ok_or(PlanError::UnknownLesson(lesson_id))?;

    let pending: Vec<ContentBlockId> = lesson
        .content_blocks
        .iter()
        .filter(|block| !snapshot.content_status(block.id).is_completed())
        .map(|block| block.id)
        .collect();
    if !pending.is_empty() {
        return Err(PlanError::Incomplete { lesson_id, pending });
    }

    let mut row = snapshot.lesson(lesson_id);
    if !row.status.is_completed() {
        row.status = ProgressStatus::Completed;
        row.completed_at = Some(now);
    }
    row.updated_at = Some(now);

    let mut next = snapshot.clone();
    next.lessons.insert(lesson_id, row.clone());

    let rollup = course_rollup(course, &next);
    let mut enrollment_next = advance_enrollment(enrollment, &rollup, now);
    enrollment_next.last_accessed_at = now;

    Ok(ProgressWrite {
        learner_id: snapshot.learner_id.clone(),
        course_id: course.id,
        expected_revision: enrollment.revision,
        content: Vec::new(),
        lessons: vec![row],
        enrollment: enrollment_next,
    })
}

/// Plan the repair of lesson rows and the cached enrollment roll-up from
/// the content rows. Returns `None` when everything already agrees.
pub fn plan_reconciliation(
    course: &Course,
    snapshot: &ProgressSnapshot,
    now: Time,
) -> Option<ProgressWrite> {
    let enrollment = snapshot.enrollment.as_ref()?;

    let mut next = snapshot.clone();
    let mut lessons = Vec::new();
    for (_, lesson) in course.lessons_in_order() {
        let stored = snapshot.lesson(lesson.id);
        let derived = derive_lesson(lesson, snapshot, now);
        if lesson_changed(&stored, &derived) {
            next.lessons.insert(lesson.id, derived.clone());
            lessons.push(derived);
        }
    }

    let rollup = course_rollup(course, &next);
    let enrollment_next = advance_enrollment(enrollment, &rollup, now);

    let enrollment_changed = enrollment_next.status != enrollment.status
        || enrollment_next.progress_percentage != enrollment.progress_percentage
        || enrollment_next.completed_at != enrollment.completed_at;
    if lessons.is_empty() && !enrollment_changed {
        return None;
    }

    Some(ProgressWrite {
        learner_id: snapshot.learner_id.clone(),
        course_id: course.id,
        expected_revision: enrollment.revision,
        content: Vec::new(),
        lessons,
        enrollment: enrollment_next,
    })
}
