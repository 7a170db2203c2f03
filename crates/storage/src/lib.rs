//! Storage abstraction and implementations for learnpath.
//!
//! This crate provides the trait-based content and progress stores, an
//! in-memory backend, a JSON course catalog and a SQLite backend.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{
    ContentStore, ProgressStore, StorageError, Result, merge_content_row, merge_lesson_row,
};
pub use memory_storage::MemoryStorage;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
