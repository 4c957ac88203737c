//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{ModuleId, ProgramError, ProgramId, VideoId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService` and `ProgressTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("program {0} does not exist")]
    UnknownProgram(ProgramId),
    #[error("video {video_id} is not part of module {module_id}")]
    UnknownVideo {
        module_id: ModuleId,
        video_id: VideoId,
    },
    #[error("no pending progress change to commit")]
    NothingPending,
    #[error("watch threshold must be between 1 and 100, got {0}")]
    InvalidWatchThreshold(u8),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `CourseService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseServiceError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
