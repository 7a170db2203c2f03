//! Learning progress engine.
//!
//! Rolls content-block progress up to lessons, modules and the course,
//! resolves lesson navigation and manages the enrollment lifecycle on top of
//! the stores in `learnpath-storage`.

#![warn(missing_docs)]

pub mod rollup;
pub mod navigation;
pub mod aggregator;
pub mod lifecycle;
pub mod engine;
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod fixtures;

pub use rollup::{
    advance_enrollment, clamp_progress, course_rollup, derive_lesson, lesson_is_complete,
    merge_content, plan_content_update, plan_lesson_completion, plan_reconciliation,
    round_percentage, CourseRollup, LessonRollup, ModuleRollup, PlanError, ProgressInput,
};
pub use navigation::{resolve_navigation, LessonLink, LessonNavigation, NavigationIndex};
pub use aggregator::{ProgressAggregator, ProgressOutcome, ReconcileOutcome, ReconcileReport};
pub use lifecycle::EnrollmentManager;
pub use engine::{BlockView, CourseView, LearningEngine, LessonView};
pub use config::{EngineConfig, ReenrollPolicy};
pub use error::{EngineError, Result};
