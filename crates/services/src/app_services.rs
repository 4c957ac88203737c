use std::sync::Arc;

use course_core::model::{ProgramId, UserId};
use storage::repository::Storage;
use storage::sqlite::SqliteSettings;

use crate::course_service::CourseService;
use crate::error::{AppServicesError, ProgressServiceError};
use crate::progress_service::ProgressService;
use crate::progress_tracker::ProgressTracker;
use crate::Clock;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<ProgressService>,
    courses: Arc<CourseService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage at `target`, a URL or path.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        target: &str,
        settings: SqliteSettings,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(target, settings).await?;
        Ok(Self::from_storage(&storage, clock))
    }

    /// Build services over in-memory repositories.
    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), clock)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&storage.content),
            Arc::clone(&storage.progress),
        ));
        let courses = Arc::new(CourseService::new(
            clock,
            Arc::clone(&storage.content),
            Arc::clone(&progress),
        ));
        Self { progress, courses }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn courses(&self) -> Arc<CourseService> {
        Arc::clone(&self.courses)
    }

    /// Optimistic tracker for one user and program, loaded from the store.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the record cannot be read.
    pub async fn tracker(
        &self,
        user_id: UserId,
        program_id: ProgramId,
    ) -> Result<ProgressTracker, ProgressServiceError> {
        ProgressTracker::load(self.progress(), user_id, program_id).await
    }
}
