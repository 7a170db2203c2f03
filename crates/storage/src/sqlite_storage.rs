//! SQLite storage backend for learnpath.
//!
//! Keeps the content hierarchy in relational tables and the progress rows in
//! one table per level. A progress write runs inside a single transaction
//! guarded by a compare-and-set on the enrollment revision; content and
//! lesson rows are max-merged in SQL so a value never moves backwards.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use async_trait::async_trait;
use chrono::SecondsFormat;
use learnpath_core::{
    ContentBlock, ContentBlockId, ContentBody, ContentProgress, Course, CourseId, Enrollment,
    LearnerId, Lesson, LessonId, LessonProgress, Module, ModuleId, ProgressSnapshot,
    ProgressStatus, ProgressWrite, Time,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, warn};

use super::trait_::{ContentStore, ProgressStore, Result, StorageError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS courses (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        estimated_duration_minutes INTEGER,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS modules (
        id TEXT PRIMARY KEY,
        course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS lessons (
        id TEXT PRIMARY KEY,
        module_id TEXT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
        course_id TEXT NOT NULL,
        title TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        estimated_duration_minutes INTEGER,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS content_blocks (
        id TEXT PRIMARY KEY,
        lesson_id TEXT NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
        course_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        sort_order INTEGER NOT NULL,
        body TEXT NOT NULL,
        completion_threshold INTEGER,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS enrollments (
        learner_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        status TEXT NOT NULL,
        progress_percentage INTEGER NOT NULL DEFAULT 0,
        enrolled_at TEXT NOT NULL,
        completed_at TEXT,
        last_accessed_at TEXT NOT NULL,
        revision INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (learner_id, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS lesson_progress (
        learner_id TEXT NOT NULL,
        lesson_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        status TEXT NOT NULL,
        completed_at TEXT,
        updated_at TEXT,
        PRIMARY KEY (learner_id, lesson_id)
    )",
    "CREATE TABLE IF NOT EXISTS content_progress (
        learner_id TEXT NOT NULL,
        content_block_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        status TEXT NOT NULL,
        progress_value INTEGER,
        completed_at TEXT,
        updated_at TEXT,
        PRIMARY KEY (learner_id, content_block_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_modules_course ON modules(course_id, sort_order)",
    "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)",
    "CREATE INDEX IF NOT EXISTS idx_blocks_course ON content_blocks(course_id)",
    "CREATE INDEX IF NOT EXISTS idx_lesson_progress_course ON lesson_progress(learner_id, course_id)",
    "CREATE INDEX IF NOT EXISTS idx_content_progress_course ON content_progress(learner_id, course_id)",
];

// Status rank used by the upserts: a stored row only ever moves forward.
const STATUS_RANK: &str = "CASE {} WHEN 'COMPLETED' THEN 2 WHEN 'IN_PROGRESS' THEN 1 ELSE 0 END";

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Open (or create) a database file from a path.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Every pooled connection to `:memory:` is its own database, so the
    /// pool is pinned to a single long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Insert or replace a course and its whole tree.
    pub async fn save_course(&self, course: &Course) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let course_id = course.id.to_string();

        sqlx::query("DELETE FROM content_blocks WHERE course_id = ?")
            .bind(&course_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM lessons WHERE course_id = ?")
            .bind(&course_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM modules WHERE course_id = ?")
            .bind(&course_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT OR REPLACE INTO courses (id, title, description, estimated_duration_minutes, created_at)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&course_id)
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.estimated_duration_minutes.map(i64::from))
        .bind(fmt_time(&course.created_at))
        .execute(&mut *tx)
        .await?;

        for module in &course.modules {
            sqlx::query(
                "INSERT INTO modules (id, course_id, title, sort_order, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(module.id.to_string())
            .bind(&course_id)
            .bind(&module.title)
            .bind(module.sort_order)
            .bind(fmt_time(&module.created_at))
            .execute(&mut *tx)
            .await?;

            for lesson in &module.lessons {
                sqlx::query(
                    "INSERT INTO lessons (id, module_id, course_id, title, sort_order, estimated_duration_minutes, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(lesson.id.to_string())
                .bind(module.id.to_string())
                .bind(&course_id)
                .bind(&lesson.title)
                .bind(lesson.sort_order)
                .bind(lesson.estimated_duration_minutes.map(i64::from))
                .bind(fmt_time(&lesson.created_at))
                .execute(&mut *tx)
                .await?;

                for block in &lesson.content_blocks {
                    let body = serde_json::to_string(&block.body)?;
                    sqlx::query(
                        "INSERT INTO content_blocks (id, lesson_id, course_id, title, sort_order, body, completion_threshold, created_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(block.id.to_string())
                    .bind(lesson.id.to_string())
                    .bind(&course_id)
                    .bind(&block.title)
                    .bind(block.sort_order)
                    .bind(body)
                    .bind(block.completion_threshold.map(i64::from))
                    .bind(fmt_time(&block.created_at))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!("Saved course {} ({} lessons)", course.id, course.total_lessons());
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SqliteStorage {
    async fn load_course(&self, id: CourseId) -> Result<Option<Course>> {
        let course_id = id.to_string();
        let row = sqlx::query(
            "SELECT id, title, description, estimated_duration_minutes, created_at FROM courses WHERE id = ?",
        )
        .bind(&course_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut course = Course {
            id,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            estimated_duration_minutes: opt_u32(row.try_get("estimated_duration_minutes")?),
            modules: Vec::new(),
            created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        };

        let block_rows = sqlx::query(
            "SELECT id, lesson_id, title, sort_order, body, completion_threshold, created_at
            FROM content_blocks WHERE course_id = ? ORDER BY sort_order, created_at, id",
        )
        .bind(&course_id)
        .fetch_all(&self.pool)
        .await?;
        let mut blocks: HashMap<LessonId, Vec<ContentBlock>> = HashMap::new();
        for row in block_rows {
            let block = block_from_row(&row)?;
            blocks.entry(block.lesson_id).or_default().push(block);
        }

        let lesson_rows = sqlx::query(
            "SELECT id, module_id, title, sort_order, estimated_duration_minutes, created_at
            FROM lessons WHERE course_id = ? ORDER BY sort_order, created_at, id",
        )
        .bind(&course_id)
        .fetch_all(&self.pool)
        .await?;
        let mut lessons: HashMap<ModuleId, Vec<Lesson>> = HashMap::new();
        for row in lesson_rows {
            let id: LessonId = parse_id(&row.try_get::<String, _>("id")?)?;
            let module_id: ModuleId = parse_id(&row.try_get::<String, _>("module_id")?)?;
            lessons.entry(module_id).or_default().push(Lesson {
                id,
                module_id,
                title: row.try_get("title")?,
                sort_order: row.try_get("sort_order")?,
                estimated_duration_minutes: opt_u32(row.try_get("estimated_duration_minutes")?),
                content_blocks: blocks.remove(&id).unwrap_or_default(),
                created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
            });
        }

        let module_rows = sqlx::query(
            "SELECT id, title, sort_order, created_at FROM modules WHERE course_id = ? ORDER BY sort_order, created_at, id",
        )
        .bind(&course_id)
        .fetch_all(&self.pool)
        .await?;
        for row in module_rows {
            let module_id: ModuleId = parse_id(&row.try_get::<String, _>("id")?)?;
            course.modules.push(Module {
                id: module_id,
                course_id: id,
                title: row.try_get("title")?,
                sort_order: row.try_get("sort_order")?,
                lessons: lessons.remove(&module_id).unwrap_or_default(),
                created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
            });
        }

        // Text timestamps do not always sort like instants.
        course.sort_hierarchy();
        Ok(Some(course))
    }

    async fn course_for_lesson(&self, id: LessonId) -> Result<Option<CourseId>> {
        let course_id: Option<String> = sqlx::query_scalar("SELECT course_id FROM lessons WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        course_id.as_deref().map(parse_id::<CourseId>).transpose()
    }

    async fn course_for_content_block(&self, id: ContentBlockId) -> Result<Option<CourseId>> {
        let course_id: Option<String> = sqlx::query_scalar("SELECT course_id FROM content_blocks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        course_id.as_deref().map(parse_id::<CourseId>).transpose()
    }
}

#[async_trait]
impl ProgressStore for SqliteStorage {
    async fn load_enrollment(&self, learner: &LearnerId, course: CourseId) -> Result<Option<Enrollment>> {
        let row = sqlx::query(
            "SELECT learner_id, course_id, status, progress_percentage, enrolled_at, completed_at, last_accessed_at, revision
            FROM enrollments WHERE learner_id = ? AND course_id = ?",
        )
        .bind(learner.as_str())
        .bind(course.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn create_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrollments (learner_id, course_id, status, progress_percentage, enrolled_at, completed_at, last_accessed_at, revision)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(enrollment.learner_id.as_str())
        .bind(enrollment.course_id.to_string())
        .bind(enrollment.status.as_str())
        .bind(i64::from(enrollment.progress_percentage))
        .bind(fmt_time(&enrollment.enrolled_at))
        .bind(enrollment.completed_at.as_ref().map(fmt_time))
        .bind(fmt_time(&enrollment.last_accessed_at))
        .bind(enrollment.revision as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_enrollments(&self, course: CourseId) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT learner_id, course_id, status, progress_percentage, enrolled_at, completed_at, last_accessed_at, revision
            FROM enrollments WHERE course_id = ? ORDER BY enrolled_at, learner_id",
        )
        .bind(course.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn load_snapshot(&self, learner: &LearnerId, course: &Course) -> Result<ProgressSnapshot> {
        let mut snapshot = ProgressSnapshot::empty(learner.clone(), course.id);
        snapshot.enrollment = self.load_enrollment(learner, course.id).await?;

        let lesson_rows = sqlx::query(
            "SELECT lesson_id, status, completed_at, updated_at
            FROM lesson_progress WHERE learner_id = ? AND course_id = ?",
        )
        .bind(learner.as_str())
        .bind(course.id.to_string())
        .fetch_all(&self.pool)
        .await?;
        for row in lesson_rows {
            let lesson_id: LessonId = parse_id(&row.try_get::<String, _>("lesson_id")?)?;
            snapshot.lessons.insert(
                lesson_id,
                LessonProgress {
                    learner_id: learner.clone(),
                    lesson_id,
                    status: parse_status(&row.try_get::<String, _>("status")?)?,
                    completed_at: opt_time(row.try_get("completed_at")?)?,
                    updated_at: opt_time(row.try_get("updated_at")?)?,
                },
            );
        }

        let content_rows = sqlx::query(
            "SELECT content_block_id, status, progress_value, completed_at, updated_at
            FROM content_progress WHERE learner_id = ? AND course_id = ?",
        )
        .bind(learner.as_str())
        .bind(course.id.to_string())
        .fetch_all(&self.pool)
        .await?;
        for row in content_rows {
            let block_id: ContentBlockId = parse_id(&row.try_get::<String, _>("content_block_id")?)?;
            let progress_value: Option<i64> = row.try_get("progress_value")?;
            snapshot.content.insert(
                block_id,
                ContentProgress {
                    learner_id: learner.clone(),
                    content_block_id: block_id,
                    status: parse_status(&row.try_get::<String, _>("status")?)?,
                    progress_value: progress_value.map(|v| v.clamp(0, 100) as u8),
                    completed_at: opt_time(row.try_get("completed_at")?)?,
                    updated_at: opt_time(row.try_get("updated_at")?)?,
                },
            );
        }

        Ok(snapshot)
    }

    async fn commit(&self, write: &ProgressWrite) -> Result<Enrollment> {
        let learner = write.learner_id.as_str();
        let course_id = write.course_id.to_string();
        let next_revision = write.expected_revision + 1;
        let enrollment = &write.enrollment;

        let mut tx = self.pool.begin().await?;

        // Claim the enrollment first: this is both the compare-and-set and
        // the statement that takes SQLite's write lock.
        let claimed = sqlx::query(
            "UPDATE enrollments
            SET status = ?, progress_percentage = ?, completed_at = COALESCE(completed_at, ?),
                last_accessed_at = ?, revision = ?
            WHERE learner_id = ? AND course_id = ? AND revision = ?",
        )
        .bind(enrollment.status.as_str())
        .bind(i64::from(enrollment.progress_percentage))
        .bind(enrollment.completed_at.as_ref().map(fmt_time))
        .bind(fmt_time(&enrollment.last_accessed_at))
        .bind(next_revision as i64)
        .bind(learner)
        .bind(&course_id)
        .bind(write.expected_revision as i64)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            let exists = self.load_enrollment(&write.learner_id, write.course_id).await?;
            return Err(match exists {
                Some(current) => StorageError::Conflict(format!(
                    "enrollment revision is {}, expected {}",
                    current.revision, write.expected_revision
                )),
                None => StorageError::NotFound(format!("enrollment ({}, {})", learner, course_id)),
            });
        }

        let content_upsert = format!(
            "INSERT INTO content_progress (learner_id, content_block_id, course_id, status, progress_value, completed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, content_block_id) DO UPDATE SET
                status = CASE WHEN {stored} >= {incoming} THEN content_progress.status ELSE excluded.status END,
                progress_value = COALESCE(
                    MAX(content_progress.progress_value, excluded.progress_value),
                    content_progress.progress_value,
                    excluded.progress_value
                ),
                completed_at = COALESCE(content_progress.completed_at, excluded.completed_at),
                updated_at = COALESCE(excluded.updated_at, content_progress.updated_at)",
            stored = STATUS_RANK.replace("{}", "content_progress.status"),
            incoming = STATUS_RANK.replace("{}", "excluded.status"),
        );
        for row in &write.content {
            sqlx::query(&content_upsert)
                .bind(learner)
                .bind(row.content_block_id.to_string())
                .bind(&course_id)
                .bind(row.status.as_str())
                .bind(row.progress_value.map(i64::from))
                .bind(row.completed_at.as_ref().map(fmt_time))
                .bind(row.updated_at.as_ref().map(fmt_time))
                .execute(&mut *tx)
                .await?;
        }

        let lesson_upsert = format!(
            "INSERT INTO lesson_progress (learner_id, lesson_id, course_id, status, completed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, lesson_id) DO UPDATE SET
                status = CASE WHEN {stored} >= {incoming} THEN lesson_progress.status ELSE excluded.status END,
                completed_at = COALESCE(lesson_progress.completed_at, excluded.completed_at),
                updated_at = COALESCE(excluded.updated_at, lesson_progress.updated_at)",
            stored = STATUS_RANK.replace("{}", "lesson_progress.status"),
            incoming = STATUS_RANK.replace("{}", "excluded.status"),
        );
        for row in &write.lessons {
            sqlx::query(&lesson_upsert)
                .bind(learner)
                .bind(row.lesson_id.to_string())
                .bind(&course_id)
                .bind(row.status.as_str())
                .bind(row.completed_at.as_ref().map(fmt_time))
                .bind(row.updated_at.as_ref().map(fmt_time))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        // Re-read so the caller sees exactly what was stored.
        self.load_enrollment(&write.learner_id, write.course_id)
            .await?
            .ok_or_else(|| {
                warn!("Enrollment ({}, {}) vanished after commit", learner, course_id);
                StorageError::NotFound(format!("enrollment ({}, {})", learner, course_id))
            })
    }
}

fn fmt_time(t: &Time) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<Time> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

fn opt_time(s: Option<String>) -> Result<Option<Time>> {
    s.as_deref().map(parse_time).transpose()
}

fn opt_u32(v: Option<i64>) -> Option<u32> {
    v.and_then(|v| u32::try_from(v).ok())
}

fn parse_id<T>(s: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| StorageError::Corrupt(format!("bad id '{}': {}", s, e)))
}

fn parse_status(s: &str) -> Result<ProgressStatus> {
    s.parse().map_err(|e: learnpath_core::ParseStatusError| StorageError::Corrupt(e.to_string()))
}

fn block_from_row(row: &SqliteRow) -> Result<ContentBlock> {
    let body: String = row.try_get("body")?;
    let body: ContentBody = serde_json::from_str(&body)?;
    let threshold: Option<i64> = row.try_get("completion_threshold")?;
    Ok(ContentBlock {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        lesson_id: parse_id(&row.try_get::<String, _>("lesson_id")?)?,
        title: row.try_get("title")?,
        sort_order: row.try_get("sort_order")?,
        body,
        completion_threshold: threshold.map(|v| v.clamp(0, 100) as u8),
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn enrollment_from_row(row: &SqliteRow) -> Result<Enrollment> {
    let percentage: i64 = row.try_get("progress_percentage")?;
    let revision: i64 = row.try_get("revision")?;
    Ok(Enrollment {
        learner_id: LearnerId::new(row.try_get::<String, _>("learner_id")?),
        course_id: parse_id(&row.try_get::<String, _>("course_id")?)?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        progress_percentage: percentage.clamp(0, 100) as u8,
        enrolled_at: parse_time(&row.try_get::<String, _>("enrolled_at")?)?,
        completed_at: opt_time(row.try_get("completed_at")?)?,
        last_accessed_at: parse_time(&row.try_get::<String, _>("last_accessed_at")?)?,
        revision: revision.max(0) as u64,
    })
}
