//! Content hierarchy - Course, Module, Lesson and ContentBlock.
//!
//! The hierarchy is authored elsewhere and is read-only to the engine.
//! Every level is kept in a total order of `(sort_order, created_at, id)`
//! so that roll-up and navigation walk lessons in the same sequence.

use serde::{Deserialize, Serialize};
use crate::id::{ContentBlockId, CourseId, LessonId, ModuleId};
use crate::Time;

/// Completion threshold applied when a block does not carry one.
pub const DEFAULT_COMPLETION_THRESHOLD: u8 = 100;

/// A course: the root of the content hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    /// Unique identifier
    pub id: CourseId,

    /// Course title
    pub title: String,

    /// Description shown on the course page
    #[serde(default)]
    pub description: String,

    /// Estimated duration in minutes
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,

    /// Modules in this course
    #[serde(default)]
    pub modules: Vec<Module>,

    /// When created
    pub created_at: Time,
}

/// A module groups lessons inside a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Unique identifier
    pub id: ModuleId,

    /// Owning course
    pub course_id: CourseId,

    /// Module title
    pub title: String,

    /// Position within the course
    pub sort_order: i32,

    /// Lessons in this module
    #[serde(default)]
    pub lessons: Vec<Lesson>,

    /// When created
    pub created_at: Time,
}

/// A lesson is the unit of completion counted by the course roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    /// Unique identifier
    pub id: LessonId,

    /// Owning module
    pub module_id: ModuleId,

    /// Lesson title
    pub title: String,

    /// Position within the module
    pub sort_order: i32,

    /// Estimated duration in minutes
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,

    /// Content blocks in this lesson
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,

    /// When created
    pub created_at: Time,
}

/// Smallest unit of consumable material inside a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Unique identifier
    pub id: ContentBlockId,

    /// Owning lesson
    pub lesson_id: LessonId,

    /// Block title
    #[serde(default)]
    pub title: String,

    /// Position within the lesson
    pub sort_order: i32,

    /// Type-specific payload
    pub body: ContentBody,

    /// Watch percentage needed to complete a video (0-100)
    #[serde(default)]
    pub completion_threshold: Option<u8>,

    /// When created
    pub created_at: Time,
}

/// Type-specific payload of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentBody {
    /// Streamed video, completed by watch percentage
    Video {
        /// Stream or file URL
        url: String,
        /// Length of the video
        #[serde(default)]
        duration_seconds: Option<u32>,
    },
    /// Inline reading material
    Text {
        /// Markdown source
        markdown: String,
    },
    /// Quiz, scored by a separate subsystem
    Quiz {
        /// Quiz reference in the assessment subsystem
        quiz_id: String,
        /// Score needed to pass, informational only
        #[serde(default)]
        pass_mark: Option<u8>,
    },
    /// Downloadable document
    Document {
        /// Download URL
        url: String,
        /// File name shown to the learner
        file_name: String,
    },
}

/// Content block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    /// Video
    Video,
    /// Text
    Text,
    /// Quiz
    Quiz,
    /// Document
    Document,
}

impl ContentType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "VIDEO",
            ContentType::Text => "TEXT",
            ContentType::Quiz => "QUIZ",
            ContentType::Document => "DOCUMENT",
        }
    }

    /// Whether completion is measured by a progress value rather than a
    /// binary "done" signal.
    pub fn is_time_based(&self) -> bool {
        matches!(self, ContentType::Video)
    }
}

impl ContentBody {
    /// Block type of this payload.
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentBody::Video { .. } => ContentType::Video,
            ContentBody::Text { .. } => ContentType::Text,
            ContentBody::Quiz { .. } => ContentType::Quiz,
            ContentBody::Document { .. } => ContentType::Document,
        }
    }
}

impl ContentBlock {
    /// Block type.
    pub fn content_type(&self) -> ContentType {
        self.body.content_type()
    }

    /// Progress value at which this block counts as completed.
    ///
    /// Only videos honour a configured threshold; every other type needs
    /// the full 100.
    pub fn effective_threshold(&self) -> u8 {
        match self.content_type() {
            ContentType::Video => self
                .completion_threshold
                .unwrap_or(DEFAULT_COMPLETION_THRESHOLD)
                .min(100),
            _ => DEFAULT_COMPLETION_THRESHOLD,
        }
    }
}

impl Course {
    /// Put every level of the hierarchy into its canonical order.
    pub fn sort_hierarchy(&mut self) {
        self.modules
            .sort_by(|a, b| (a.sort_order, a.created_at, a.id).cmp(&(b.sort_order, b.created_at, b.id)));
        for module in &mut self.modules {
            module
                .lessons
                .sort_by(|a, b| (a.sort_order, a.created_at, a.id).cmp(&(b.sort_order, b.created_at, b.id)));
            for lesson in &mut module.lessons {
                lesson
                    .content_blocks
                    .sort_by(|a, b| (a.sort_order, a.created_at, a.id).cmp(&(b.sort_order, b.created_at, b.id)));
            }
        }
    }

    /// Lessons flattened across modules, in course order.
    pub fn lessons_in_order(&self) -> impl Iterator<Item = (&Module, &Lesson)> {
        self.modules
            .iter()
            .flat_map(|module| module.lessons.iter().map(move |lesson| (module, lesson)))
    }

    /// Number of lessons across all modules.
    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    /// Find a lesson by ID.
    pub fn lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons_in_order()
            .map(|(_, lesson)| lesson)
            .find(|lesson| lesson.id == id)
    }

    /// Find a content block and the lesson that owns it.
    pub fn find_block(&self, id: ContentBlockId) -> Option<(&Lesson, &ContentBlock)> {
        self.lessons_in_order().find_map(|(_, lesson)| {
            lesson
                .content_blocks
                .iter()
                .find(|block| block.id == id)
                .map(|block| (lesson, block))
        })
    }

    /// Every content block in the course.
    pub fn content_blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.lessons_in_order()
            .flat_map(|(_, lesson)| lesson.content_blocks.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn video(lesson_id: LessonId, sort_order: i32, threshold: Option<u8>) -> ContentBlock {
        ContentBlock {
            id: ContentBlockId::new(),
            lesson_id,
            title: "Intro video".to_string(),
            sort_order,
            body: ContentBody::Video {
                url: "https://cdn.example/intro.mp4".to_string(),
                duration_seconds: Some(300),
            },
            completion_threshold: threshold,
            created_at: Utc::now(),
        }
    }

    fn lesson(module_id: ModuleId, title: &str, sort_order: i32, created_at: Time) -> Lesson {
        Lesson {
            id: LessonId::new(),
            module_id,
            title: title.to_string(),
            sort_order,
            estimated_duration_minutes: None,
            content_blocks: Vec::new(),
            created_at,
        }
    }

    #[test]
    fn test_video_threshold_defaults_to_100() {
        let block = video(LessonId::new(), 0, None);
        assert_eq!(block.effective_threshold(), 100);

        let block = video(LessonId::new(), 0, Some(90));
        assert_eq!(block.effective_threshold(), 90);

        let block = video(LessonId::new(), 0, Some(150));
        assert_eq!(block.effective_threshold(), 100);
    }

    #[test]
    fn test_threshold_ignored_for_binary_blocks() {
        let mut block = video(LessonId::new(), 0, Some(40));
        block.body = ContentBody::Text { markdown: "# Read me".to_string() };
        assert_eq!(block.content_type(), ContentType::Text);
        assert_eq!(block.effective_threshold(), 100);
        assert!(!block.content_type().is_time_based());
    }

    #[test]
    fn test_sort_hierarchy_breaks_ties_by_created_at() {
        let course_id = CourseId::new();
        let module_id = ModuleId::new();
        let t0 = Utc::now();
        let later = lesson(module_id, "later", 1, t0 + Duration::seconds(5));
        let earlier = lesson(module_id, "earlier", 1, t0);
        let first = lesson(module_id, "first", 0, t0 + Duration::seconds(10));

        let mut course = Course {
            id: course_id,
            title: "Coaching 101".to_string(),
            description: String::new(),
            estimated_duration_minutes: None,
            modules: vec![Module {
                id: module_id,
                course_id,
                title: "Basics".to_string(),
                sort_order: 0,
                lessons: vec![later, earlier, first],
                created_at: t0,
            }],
            created_at: t0,
        };
        course.sort_hierarchy();

        let titles: Vec<_> = course.lessons_in_order().map(|(_, l)| l.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "earlier", "later"]);
    }

    #[test]
    fn test_find_block_returns_owning_lesson() {
        let course_id = CourseId::new();
        let module_id = ModuleId::new();
        let mut l = lesson(module_id, "one", 0, Utc::now());
        let block = video(l.id, 0, Some(90));
        let block_id = block.id;
        l.content_blocks.push(block);
        let lesson_id = l.id;

        let course = Course {
            id: course_id,
            title: "Coaching 101".to_string(),
            description: String::new(),
            estimated_duration_minutes: Some(60),
            modules: vec![Module {
                id: module_id,
                course_id,
                title: "Basics".to_string(),
                sort_order: 0,
                lessons: vec![l],
                created_at: Utc::now(),
            }],
            created_at: Utc::now(),
        };

        let (owner, found) = course.find_block(block_id).unwrap();
        assert_eq!(owner.id, lesson_id);
        assert_eq!(found.id, block_id);
        assert!(course.find_block(ContentBlockId::new()).is_none());
        assert_eq!(course.total_lessons(), 1);
        assert_eq!(course.content_blocks().count(), 1);
    }

    #[test]
    fn test_content_body_serializes_with_type_tag() {
        let body = ContentBody::Document {
            url: "https://files.example/handbook.pdf".to_string(),
            file_name: "handbook.pdf".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "DOCUMENT");
        let back: ContentBody = serde_json::from_value(json).unwrap();
        assert_eq!(back.content_type(), ContentType::Document);
    }
}
