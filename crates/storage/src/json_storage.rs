//! JSON file catalog of authored courses.
//!
//! Stores one `<course-id>.json` document per course in a directory. The
//! catalog is the hand-off format from the authoring side: it is read by
//! the engine and imported into a relational store by the CLI.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use learnpath_core::{ContentBlockId, Course, CourseId, LessonId};
use tokio::fs;
use tracing::{debug, warn};

use super::trait_::{ContentStore, Result, StorageError};

/// File-based JSON course catalog.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Open a catalog directory, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn course_path(&self, id: CourseId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Write a course document.
    pub async fn save_course(&self, course: &Course) -> Result<()> {
        let json = serde_json::to_string_pretty(course)?;
        fs::write(self.course_path(course.id), json.as_bytes()).await?;
        Ok(())
    }

    /// Load every course in the catalog, in canonical order.
    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        let mut courses: Vec<Course> = list_dir(&self.root).await?;
        for course in &mut courses {
            course.sort_hierarchy();
        }
        courses.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(courses)
    }
}

#[async_trait]
impl ContentStore for JsonStorage {
    async fn load_course(&self, id: CourseId) -> Result<Option<Course>> {
        let Some(mut course) = read_json::<Course>(&self.course_path(id)).await? else {
            return Ok(None);
        };
        if course.id != id {
            return Err(StorageError::Corrupt(format!(
                "catalog file for {} contains course {}",
                id, course.id
            )));
        }
        course.sort_hierarchy();
        Ok(Some(course))
    }

    async fn course_for_lesson(&self, id: LessonId) -> Result<Option<CourseId>> {
        let courses = self.list_courses().await?;
        Ok(courses
            .into_iter()
            .find(|course| course.lesson(id).is_some())
            .map(|course| course.id))
    }

    async fn course_for_content_block(&self, id: ContentBlockId) -> Result<Option<CourseId>> {
        let courses = self.list_courses().await?;
        Ok(courses
            .into_iter()
            .find(|course| course.find_block(id).is_some())
            .map(|course| course.id))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable catalog file {}: {}", path.display(), e),
        }
    }
    debug!("Read {} catalog documents from {}", items.len(), dir.display());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use learnpath_core::{ContentBlock, ContentBody, Lesson, Module, ModuleId};

    fn course_with_two_lessons() -> Course {
        let course_id = CourseId::new();
        let module_id = ModuleId::new();
        let now = Utc::now();
        let lesson = |title: &str, sort_order: i32| {
            let id = LessonId::new();
            Lesson {
                id,
                module_id,
                title: title.to_string(),
                sort_order,
                estimated_duration_minutes: Some(10),
                content_blocks: vec![ContentBlock {
                    id: ContentBlockId::new(),
                    lesson_id: id,
                    title: format!("{} video", title),
                    sort_order: 0,
                    body: ContentBody::Video {
                        url: format!("https://cdn.example/{}.mp4", title),
                        duration_seconds: None,
                    },
                    completion_threshold: Some(90),
                    created_at: now,
                }],
                created_at: now + Duration::seconds(sort_order as i64),
            }
        };
        Course {
            id: course_id,
            title: "Ambassador Basics".to_string(),
            description: "Everything a new ambassador needs".to_string(),
            estimated_duration_minutes: Some(20),
            // Stored out of order on purpose.
            modules: vec![Module {
                id: module_id,
                course_id,
                title: "Start".to_string(),
                sort_order: 0,
                lessons: vec![lesson("second", 2), lesson("first", 1)],
                created_at: now,
            }],
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonStorage::new(dir.path()).await.unwrap();
        let course = course_with_two_lessons();
        catalog.save_course(&course).await.unwrap();

        let loaded = catalog.load_course(course.id).await.unwrap().unwrap();
        let titles: Vec<_> = loaded.lessons_in_order().map(|(_, l)| l.title.clone()).collect();
        assert_eq!(titles, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_missing_course_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonStorage::new(dir.path()).await.unwrap();
        assert!(catalog.load_course(CourseId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_owner_course() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonStorage::new(dir.path()).await.unwrap();
        let course = course_with_two_lessons();
        catalog.save_course(&course).await.unwrap();
        catalog.save_course(&course_with_two_lessons()).await.unwrap();

        let (_, lesson) = course.lessons_in_order().next().unwrap();
        let block = &lesson.content_blocks[0];
        assert_eq!(catalog.course_for_lesson(lesson.id).await.unwrap(), Some(course.id));
        assert_eq!(catalog.course_for_content_block(block.id).await.unwrap(), Some(course.id));
        assert!(catalog.course_for_content_block(ContentBlockId::new()).await.unwrap().is_none());
        assert_eq!(catalog.list_courses().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonStorage::new(dir.path()).await.unwrap();
        let course = course_with_two_lessons();
        let other = CourseId::new();
        std::fs::write(
            dir.path().join(format!("{}.json", other)),
            serde_json::to_string(&course).unwrap(),
        )
        .unwrap();

        let err = catalog.load_course(other).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }
}
