//! Sequential navigation across the flattened lesson order of a course.
//!
//! Lessons are ordered by module order first and lesson order within a
//! module second, so "next" crosses module boundaries.

use std::collections::HashMap;
use serde::Serialize;
use learnpath_core::{Course, Lesson, LessonId, Module, ModuleId, ProgressStatus};

use crate::rollup::CourseRollup;

/// A neighbouring lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonLink {
    /// Lesson
    pub id: LessonId,
    /// Owning module
    pub module_id: ModuleId,
    /// Lesson title
    pub title: String,
}

impl LessonLink {
    fn new(module: &Module, lesson: &Lesson) -> Self {
        Self {
            id: lesson.id,
            module_id: module.id,
            title: lesson.title.clone(),
        }
    }
}

/// Position of a lesson within its course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonNavigation {
    /// Previous lesson, `None` on the first lesson
    pub prev_lesson: Option<LessonLink>,
    /// Next lesson, `None` on the last lesson
    pub next_lesson: Option<LessonLink>,
    /// 1-based position of the lesson
    pub current_index: usize,
    /// Lessons in the course
    pub total_lessons: usize,
}

/// Resolve the neighbours of a lesson by walking the course.
///
/// Returns `None` when the lesson is not part of the course.
pub fn resolve_navigation(course: &Course, lesson_id: LessonId) -> Option<LessonNavigation> {
    let order: Vec<(&Module, &Lesson)> = course.lessons_in_order().collect();
    let position = order.iter().position(|(_, lesson)| lesson.id == lesson_id)?;

    let link = |i: usize| order.get(i).map(|(module, lesson)| LessonLink::new(module, lesson));

    Some(LessonNavigation {
        prev_lesson: position.checked_sub(1).and_then(link),
        next_lesson: link(position + 1),
        current_index: position + 1,
        total_lessons: order.len(),
    })
}

/// Precomputed navigation for a course.
///
/// Build once per loaded course and reuse it for every lesson lookup.
#[derive(Debug, Clone, Default)]
pub struct NavigationIndex {
    order: Vec<LessonLink>,
    positions: HashMap<LessonId, usize>,
}

impl NavigationIndex {
    /// Flatten the course into lesson order.
    pub fn build(course: &Course) -> Self {
        let order: Vec<LessonLink> = course
            .lessons_in_order()
            .map(|(module, lesson)| LessonLink::new(module, lesson))
            .collect();
        let positions = order
            .iter()
            .enumerate()
            .map(|(i, link)| (link.id, i))
            .collect();
        Self { order, positions }
    }

    /// Neighbours of a lesson, identical to [`resolve_navigation`].
    pub fn resolve(&self, lesson_id: LessonId) -> Option<LessonNavigation> {
        let position = *self.positions.get(&lesson_id)?;
        Some(LessonNavigation {
            prev_lesson: position
                .checked_sub(1)
                .and_then(|i| self.order.get(i).cloned()),
            next_lesson: self.order.get(position + 1).cloned(),
            current_index: position + 1,
            total_lessons: self.order.len(),
        })
    }

    /// Lessons in the course.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the course has no lessons.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The first lesson of the course.
    pub fn first_lesson(&self) -> Option<&LessonLink> {
        self.order.first()
    }

    /// The first lesson, in course order, that is not completed yet.
    ///
    /// `None` once every lesson is completed.
    pub fn next_incomplete(&self, rollup: &CourseRollup) -> Option<&LessonLink> {
        let status: HashMap<LessonId, ProgressStatus> = rollup
            .lessons
            .iter()
            .map(|l| (l.lesson_id, l.status))
            .collect();
        self.order.iter().find(|link| {
            !status
                .get(&link.id)
                .copied()
                .unwrap_or_default()
                .is_completed()
        })
    }
}
