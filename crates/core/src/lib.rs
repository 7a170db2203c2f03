//! learnpath core data models.
//!
//! This crate defines the content hierarchy a learner moves through and
//! the per-learner progress rows tracked against it.

#![warn(missing_docs)]

// Core identities
mod id;

// Read model
mod course;

// Write model
mod progress;

// Re-exports
pub use id::*;

pub use course::{
    Course, Module, Lesson, ContentBlock, ContentBody, ContentType,
    DEFAULT_COMPLETION_THRESHOLD,
};
pub use progress::{
    ProgressStatus, ParseStatusError, Enrollment, LessonProgress, ContentProgress,
    ProgressSnapshot, ProgressWrite,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
