//! Course builders shared by the unit tests.

use std::sync::Arc;
use chrono::{Duration, Utc};
use learnpath_core::{
    ContentBlock, ContentBlockId, ContentBody, Course, CourseId, LearnerId, Lesson, LessonId,
    Module, ModuleId,
};
use learnpath_storage::MemoryStorage;

use crate::LearningEngine;

pub(crate) fn video(threshold: Option<u8>) -> (ContentBody, Option<u8>) {
    (
        ContentBody::Video {
            url: "https://cdn.example/lesson.mp4".to_string(),
            duration_seconds: Some(420),
        },
        threshold,
    )
}

pub(crate) fn text() -> (ContentBody, Option<u8>) {
    (ContentBody::Text { markdown: "## Notes".to_string() }, None)
}

pub(crate) fn quiz() -> (ContentBody, Option<u8>) {
    (ContentBody::Quiz { quiz_id: "quiz-1".to_string(), pass_mark: Some(70) }, None)
}

pub(crate) fn document() -> (ContentBody, Option<u8>) {
    (
        ContentBody::Document {
            url: "https://files.example/guide.pdf".to_string(),
            file_name: "guide.pdf".to_string(),
        },
        None,
    )
}

/// Build a course from `modules[module][lesson][block]`.
pub(crate) fn course(modules: Vec<Vec<Vec<(ContentBody, Option<u8>)>>>) -> Course {
    let course_id = CourseId::new();
    let t0 = Utc::now();
    let modules = modules
        .into_iter()
        .enumerate()
        .map(|(m, lessons)| {
            let module_id = ModuleId::new();
            let lessons = lessons
                .into_iter()
                .enumerate()
                .map(|(l, blocks)| {
                    let lesson_id = LessonId::new();
                    let content_blocks = blocks
                        .into_iter()
                        .enumerate()
                        .map(|(b, (body, threshold))| ContentBlock {
                            id: ContentBlockId::new(),
                            lesson_id,
                            title: format!("Block {}", b + 1),
                            sort_order: b as i32,
                            body,
                            completion_threshold: threshold,
                            created_at: t0,
                        })
                        .collect();
                    Lesson {
                        id: lesson_id,
                        module_id,
                        title: format!("Lesson {}.{}", m + 1, l + 1),
                        sort_order: l as i32,
                        estimated_duration_minutes: Some(10),
                        content_blocks,
                        created_at: t0 + Duration::milliseconds(l as i64),
                    }
                })
                .collect();
            Module {
                id: module_id,
                course_id,
                title: format!("Module {}", m + 1),
                sort_order: m as i32,
                lessons,
                created_at: t0,
            }
        })
        .collect();

    Course {
        id: course_id,
        title: "Coach Onboarding".to_string(),
        description: String::new(),
        estimated_duration_minutes: Some(90),
        modules,
        created_at: t0,
    }
}

/// `modules` x `lessons` lessons, each holding one video with `threshold`.
pub(crate) fn video_course(modules: usize, lessons: usize, threshold: u8) -> Course {
    course(
        (0..modules)
            .map(|_| (0..lessons).map(|_| vec![video(Some(threshold))]).collect())
            .collect(),
    )
}

/// Block IDs of every lesson, in course order.
pub(crate) fn lesson_blocks(course: &Course) -> Vec<(LessonId, Vec<ContentBlockId>)> {
    course
        .lessons_in_order()
        .map(|(_, lesson)| (lesson.id, lesson.content_blocks.iter().map(|b| b.id).collect()))
        .collect()
}

pub(crate) fn learner() -> LearnerId {
    LearnerId::new("coach-17")
}

pub(crate) async fn memory_engine(course: &Course) -> (LearningEngine, MemoryStorage) {
    let storage = MemoryStorage::new();
    storage.save_course(course).await.unwrap();
    let engine = LearningEngine::new(Arc::new(storage.clone()), Arc::new(storage.clone()));
    (engine, storage)
}
