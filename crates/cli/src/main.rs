//! learnpath CLI - operator tool for the learning progress engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use learnpath_core::{CourseId, LearnerId, LessonId, ContentBlockId};
use learnpath_storage::{JsonStorage, SqliteStorage};
use learnpath_progress::{
    CourseView, EngineConfig, LearningEngine, LessonView, ProgressOutcome, ReconcileOutcome,
};

#[derive(Parser)]
#[command(name = "learnpath")]
#[command(about = "Learning progress engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path
    #[arg(long, default_value = "learnpath.db", global = true)]
    db: PathBuf,

    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import every course document from a catalog directory
    Import {
        /// Directory of `<course-id>.json` documents
        dir: PathBuf,
    },
    /// Enroll a learner in a course
    Enroll {
        /// Learner ID
        learner: String,
        /// Course ID
        course: String,
    },
    /// Report progress on a content block
    Progress {
        /// Learner ID
        learner: String,
        /// Content block ID
        block: String,
        /// Progress value (0-100)
        #[arg(long, allow_negative_numbers = true)]
        value: Option<i64>,
        /// Mark the block complete
        #[arg(long)]
        complete: bool,
    },
    /// Mark a lesson complete
    CompleteLesson {
        /// Learner ID
        learner: String,
        /// Lesson ID
        lesson: String,
    },
    /// Show a course with the learner's progress
    Show {
        /// Learner ID
        learner: String,
        /// Course ID
        course: String,
    },
    /// Show a lesson with the learner's progress
    Lesson {
        /// Learner ID
        learner: String,
        /// Lesson ID
        lesson: String,
    },
    /// Recompute stored roll-ups from content progress
    Reconcile {
        /// Course ID
        course: String,
        /// Only this learner
        #[arg(long)]
        learner: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

fn parse_id<T>(kind: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("Invalid {} ID: {}", kind, raw))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref()).await?;
    let storage = SqliteStorage::new_from_path(&cli.db)
        .await
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    let engine = LearningEngine::new(Arc::new(storage.clone()), Arc::new(storage.clone()))
        .with_config(config);

    match cli.command {
        Commands::Import { dir } => {
            let catalog = JsonStorage::new(&dir).await?;
            let courses = catalog.list_courses().await?;
            for course in &courses {
                storage.save_course(course).await?;
                println!("Imported course: {} - {} ({} lessons)", course.id, course.title, course.total_lessons());
            }
            info!("Imported {} courses from {}", courses.len(), dir.display());
        }
        Commands::Enroll { learner, course } => {
            let learner = LearnerId::new(learner);
            let course_id: CourseId = parse_id("course", &course)?;
            let enrollment = engine.enroll(&learner, course_id).await?;
            if cli.json {
                print_json(&enrollment)?;
            } else {
                println!("Enrolled {} in {} at {}", learner, course_id, enrollment.enrolled_at);
            }
        }
        Commands::Progress { learner, block, value, complete } => {
            let learner = LearnerId::new(learner);
            let block_id: ContentBlockId = parse_id("content block", &block)?;
            let outcome = engine
                .update_content_progress(&learner, block_id, value, Some(complete))
                .await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::CompleteLesson { learner, lesson } => {
            let learner = LearnerId::new(learner);
            let lesson_id: LessonId = parse_id("lesson", &lesson)?;
            let outcome = engine.mark_lesson_complete(&learner, lesson_id).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::Show { learner, course } => {
            let learner = LearnerId::new(learner);
            let course_id: CourseId = parse_id("course", &course)?;
            let view = engine.get_course_for_learner(&learner, course_id).await?;
            if cli.json {
                print_json(&view)?;
            } else {
                print_course(&view);
            }
        }
        Commands::Lesson { learner, lesson } => {
            let learner = LearnerId::new(learner);
            let lesson_id: LessonId = parse_id("lesson", &lesson)?;
            let view = engine.get_lesson_content(&learner, lesson_id).await?;
            if cli.json {
                print_json(&view)?;
            } else {
                print_lesson(&view);
            }
        }
        Commands::Reconcile { course, learner } => {
            let course_id: CourseId = parse_id("course", &course)?;
            match learner {
                Some(learner) => {
                    let learner = LearnerId::new(learner);
                    let outcome = engine.reconcile_enrollment(&learner, course_id).await?;
                    if cli.json {
                        print_json(&outcome)?;
                    } else {
                        match outcome {
                            ReconcileOutcome::Consistent => println!("{}: consistent", learner),
                            ReconcileOutcome::Repaired(outcome) => {
                                println!("{}: repaired", learner);
                                print_outcome(&outcome);
                            }
                        }
                    }
                }
                None => {
                    let report = engine.reconcile_course(course_id).await?;
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        println!("Reconciled {} enrollments in {}", report.checked, course_id);
                        for learner in &report.repaired {
                            println!("  repaired: {}", learner);
                        }
                        for (learner, reason) in &report.failed {
                            println!("  failed: {} ({})", learner, reason);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &ProgressOutcome) {
    let enrollment = &outcome.enrollment;
    println!("Enrollment: {} {}%", enrollment.status, enrollment.progress_percentage);
    for row in &outcome.content {
        match row.progress_value {
            Some(value) => println!("  block {} | {} | {}%", row.content_block_id, row.status, value),
            None => println!("  block {} | {}", row.content_block_id, row.status),
        }
    }
    for lesson_id in &outcome.newly_completed {
        println!("  lesson completed: {}", lesson_id);
    }
    if outcome.course_completed {
        println!("  course completed");
    }
}

fn print_course(view: &CourseView) {
    println!("Course: {} - {}", view.course.id, view.course.title);
    match &view.enrollment {
        Some(enrollment) => println!(
            "  Enrollment: {} {}%",
            enrollment.status, enrollment.progress_percentage
        ),
        None => println!("  Not enrolled"),
    }
    println!(
        "  Lessons: {}/{} ({}%)",
        view.rollup.completed_lessons, view.rollup.total_lessons, view.rollup.percentage
    );
    for (module, rollup) in view.course.modules.iter().zip(&view.rollup.modules) {
        println!("  Module: {} [{} {}%]", module.title, rollup.status, rollup.percentage);
        for lesson in &module.lessons {
            let status = view
                .rollup
                .lesson(lesson.id)
                .map(|l| l.status.as_str())
                .unwrap_or("NOT_STARTED");
            println!("    {} | {} | {}", lesson.id, status, lesson.title);
        }
    }
    if let Some(resume) = &view.resume_lesson {
        println!("  Resume at: {} ({})", resume.title, resume.id);
    }
}

fn print_lesson(view: &LessonView) {
    let nav = &view.navigation;
    println!(
        "Lesson {}/{}: {} [{}]",
        nav.current_index, nav.total_lessons, view.lesson.title, view.lesson_progress.status
    );
    for item in &view.blocks {
        let value = item
            .progress
            .progress_value
            .map(|v| format!(" {}%", v))
            .unwrap_or_default();
        println!(
            "  {} | {} | {}{} | {}",
            item.block.id,
            item.block.content_type().as_str(),
            item.progress.status,
            value,
            item.block.title
        );
    }
    if let Some(prev) = &nav.prev_lesson {
        println!("  Previous: {} ({})", prev.title, prev.id);
    }
    if let Some(next) = &nav.next_lesson {
        println!("  Next: {} ({})", next.title, next.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_progress::ReenrollPolicy;

    #[test]
    fn test_parse_id_reports_kind() {
        let err = parse_id::<CourseId>("course", "not-a-ulid").unwrap_err();
        assert!(err.to_string().contains("Invalid course ID"));

        let id = CourseId::new();
        assert_eq!(parse_id::<CourseId>("course", &id.to_string()).unwrap(), id);
    }

    #[tokio::test]
    async fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        tokio::fs::write(&path, r#"{"reenroll_policy": "return_existing", "max_commit_attempts": 8}"#)
            .await
            .unwrap();

        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config.reenroll_policy, ReenrollPolicy::ReturnExisting);
        assert_eq!(config.max_commit_attempts, 8);

        assert_eq!(load_config(None).await.unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_cli_parses_progress() {
        let cli = Cli::try_parse_from([
            "learnpath", "--db", "/tmp/x.db", "progress", "coach-17", "01ARZ3NDEKTSV4RRFFQ69G5FAV", "--value", "95",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        match cli.command {
            Commands::Progress { learner, value, complete, .. } => {
                assert_eq!(learner, "coach-17");
                assert_eq!(value, Some(95));
                assert!(!complete);
            }
            _ => panic!("expected progress command"),
        }
    }
}
