//! In-memory storage backend.
//!
//! Holds the content hierarchy and progress rows in process memory behind a
//! single lock. Used by tests and by embedders that keep their own
//! persistence elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use learnpath_core::{
    ContentBlockId, ContentProgress, Course, CourseId, Enrollment, LearnerId, LessonId,
    LessonProgress, ProgressSnapshot, ProgressWrite,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::trait_::{merge_content_row, merge_lesson_row, ContentStore, ProgressStore, Result, StorageError};

#[derive(Default)]
struct Tables {
    courses: HashMap<CourseId, Course>,
    lesson_index: HashMap<LessonId, CourseId>,
    block_index: HashMap<ContentBlockId, CourseId>,
    enrollments: HashMap<(LearnerId, CourseId), Enrollment>,
    lessons: HashMap<(LearnerId, LessonId), LessonProgress>,
    content: HashMap<(LearnerId, ContentBlockId), ContentProgress>,
}

/// Memory-backed storage. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a course.
    pub async fn save_course(&self, course: &Course) -> Result<()> {
        let mut course = course.clone();
        course.sort_hierarchy();

        let mut tables = self.tables.write().await;
        if let Some(previous) = tables.courses.remove(&course.id) {
            for (_, lesson) in previous.lessons_in_order() {
                tables.lesson_index.remove(&lesson.id);
            }
            for block in previous.content_blocks() {
                tables.block_index.remove(&block.id);
            }
        }
        for (_, lesson) in course.lessons_in_order() {
            tables.lesson_index.insert(lesson.id, course.id);
        }
        for block in course.content_blocks() {
            tables.block_index.insert(block.id, course.id);
        }
        tables.courses.insert(course.id, course);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStorage {
    async fn load_course(&self, id: CourseId) -> Result<Option<Course>> {
        Ok(self.tables.read().await.courses.get(&id).cloned())
    }

    async fn course_for_lesson(&self, id: LessonId) -> Result<Option<CourseId>> {
        Ok(self.tables.read().await.lesson_index.get(&id).copied())
    }

    async fn course_for_content_block(&self, id: ContentBlockId) -> Result<Option<CourseId>> {
        Ok(self.tables.read().await.block_index.get(&id).copied())
    }
}

#[async_trait]
impl ProgressStore for MemoryStorage {
    async fn load_enrollment(&self, learner: &LearnerId, course: CourseId) -> Result<Option<Enrollment>> {
        let tables = self.tables.read().await;
        Ok(tables.enrollments.get(&(learner.clone(), course)).cloned())
    }

    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (enrollment.learner_id.clone(), enrollment.course_id);
        if tables.enrollments.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "enrollment ({}, {}) already exists",
                enrollment.learner_id, enrollment.course_id
            )));
        }
        tables.enrollments.insert(key, enrollment.clone());
        Ok(())
    }

    async fn list_enrollments(&self, course: CourseId) -> Result<Vec<Enrollment>> {
        let tables = self.tables.read().await;
        let mut enrollments: Vec<Enrollment> = tables
            .enrollments
            .values()
            .filter(|e| e.course_id == course)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| a.enrolled_at.cmp(&b.enrolled_at));
        Ok(enrollments)
    }

    async fn load_snapshot(&self, learner: &LearnerId, course: &Course) -> Result<ProgressSnapshot> {
        let tables = self.tables.read().await;
        let mut snapshot = ProgressSnapshot::empty(learner.clone(), course.id);
        snapshot.enrollment = tables.enrollments.get(&(learner.clone(), course.id)).cloned();

        for (_, lesson) in course.lessons_in_order() {
            if let Some(row) = tables.lessons.get(&(learner.clone(), lesson.id)) {
                snapshot.lessons.insert(lesson.id, row.clone());
            }
            for block in &lesson.content_blocks {
                if let Some(row) = tables.content.get(&(learner.clone(), block.id)) {
                    snapshot.content.insert(block.id, row.clone());
                }
            }
        }

        Ok(snapshot)
    }

    async fn commit(&self, write: &ProgressWrite) -> Result<Enrollment> {
        let mut tables = self.tables.write().await;
        let key = (write.learner_id.clone(), write.course_id);

        let current = tables
            .enrollments
            .get(&key)
            .ok_or_else(|| StorageError::NotFound(format!("enrollment ({}, {})", key.0, key.1)))?;
        if current.revision != write.expected_revision {
            debug!(
                learner = %write.learner_id,
                course = %write.course_id,
                expected = write.expected_revision,
                actual = current.revision,
                "Rejecting stale progress write"
            );
            return Err(StorageError::Conflict(format!(
                "enrollment revision is {}, expected {}",
                current.revision, write.expected_revision
            )));
        }

        for row in &write.content {
            let row_key = (row.learner_id.clone(), row.content_block_id);
            let merged = merge_content_row(tables.content.get(&row_key), row);
            tables.content.insert(row_key, merged);
        }
        for row in &write.lessons {
            let row_key = (row.learner_id.clone(), row.lesson_id);
            let merged = merge_lesson_row(tables.lessons.get(&row_key), row);
            tables.lessons.insert(row_key, merged);
        }

        let mut enrollment = write.enrollment.clone();
        enrollment.revision = write.expected_revision + 1;
        tables.enrollments.insert(key, enrollment.clone());

        Ok(enrollment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use learnpath_core::{ContentBlock, ContentBody, Lesson, Module, ModuleId, ProgressStatus};

    fn one_lesson_course() -> Course {
        let course_id = CourseId::new();
        let module_id = ModuleId::new();
        let lesson_id = LessonId::new();
        Course {
            id: course_id,
            title: "Onboarding".to_string(),
            description: String::new(),
            estimated_duration_minutes: None,
            modules: vec![Module {
                id: module_id,
                course_id,
                title: "Welcome".to_string(),
                sort_order: 0,
                lessons: vec![Lesson {
                    id: lesson_id,
                    module_id,
                    title: "Hello".to_string(),
                    sort_order: 0,
                    estimated_duration_minutes: None,
                    content_blocks: vec![ContentBlock {
                        id: ContentBlockId::new(),
                        lesson_id,
                        title: "Read".to_string(),
                        sort_order: 0,
                        body: ContentBody::Text { markdown: "hi".to_string() },
                        completion_threshold: None,
                        created_at: Utc::now(),
                    }],
                    created_at: Utc::now(),
                }],
                created_at: Utc::now(),
            }],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_course_indexes() {
        let storage = MemoryStorage::new();
        let course = one_lesson_course();
        storage.save_course(&course).await.unwrap();

        let (_, lesson) = course.lessons_in_order().next().unwrap();
        let block = &lesson.content_blocks[0];

        assert_eq!(storage.course_for_lesson(lesson.id).await.unwrap(), Some(course.id));
        assert_eq!(storage.course_for_content_block(block.id).await.unwrap(), Some(course.id));
        assert!(storage.course_for_lesson(LessonId::new()).await.unwrap().is_none());
        assert_eq!(storage.load_course(course.id).await.unwrap().unwrap().title, "Onboarding");
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_conflicts() {
        let storage = MemoryStorage::new();
        let enrollment = Enrollment::new(LearnerId::new("l1"), CourseId::new(), Utc::now());
        storage.create_enrollment(&enrollment).await.unwrap();

        let err = storage.create_enrollment(&enrollment).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_revision() {
        let storage = MemoryStorage::new();
        let course = one_lesson_course();
        storage.save_course(&course).await.unwrap();
        let learner = LearnerId::new("l1");
        let enrollment = Enrollment::new(learner.clone(), course.id, Utc::now());
        storage.create_enrollment(&enrollment).await.unwrap();

        let block_id = course.content_blocks().next().unwrap().id;
        let mut row = ContentProgress::not_started(learner.clone(), block_id);
        row.status = ProgressStatus::InProgress;

        let write = ProgressWrite {
            learner_id: learner.clone(),
            course_id: course.id,
            expected_revision: 0,
            content: vec![row],
            lessons: vec![],
            enrollment: enrollment.clone(),
        };
        let stored = storage.commit(&write).await.unwrap();
        assert_eq!(stored.revision, 1);

        // Same write again is planned against revision 0 and must bounce.
        let err = storage.commit(&write).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let snapshot = storage.load_snapshot(&learner, &course).await.unwrap();
        assert_eq!(snapshot.content_status(block_id), ProgressStatus::InProgress);
        assert_eq!(snapshot.enrollment.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_list_enrollments_filters_by_course() {
        let storage = MemoryStorage::new();
        let course = CourseId::new();
        storage
            .create_enrollment(&Enrollment::new(LearnerId::new("a"), course, Utc::now()))
            .await
            .unwrap();
        storage
            .create_enrollment(&Enrollment::new(LearnerId::new("b"), course, Utc::now()))
            .await
            .unwrap();
        storage
            .create_enrollment(&Enrollment::new(LearnerId::new("a"), CourseId::new(), Utc::now()))
            .await
            .unwrap();

        assert_eq!(storage.list_enrollments(course).await.unwrap().len(), 2);
    }
}
