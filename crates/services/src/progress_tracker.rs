use std::sync::Arc;

use course_core::model::{ModuleId, ProgramId, UserId, UserProgressRecord, VideoId};

use crate::error::ProgressServiceError;
use crate::progress_service::ProgressService;

/// Optimistic progress state for one user and program.
///
/// A toggle first becomes *pending* so the UI can render it immediately.
/// Committing persists it; if the write fails the tracker falls back to the
/// last confirmed record instead of keeping a value the store never saw.
pub struct ProgressTracker {
    service: Arc<ProgressService>,
    user_id: UserId,
    program_id: ProgramId,
    confirmed: Option<UserProgressRecord>,
    pending: Option<UserProgressRecord>,
}

impl ProgressTracker {
    /// Load the last persisted record as the confirmed state.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the store cannot be read.
    pub async fn load(
        service: Arc<ProgressService>,
        user_id: UserId,
        program_id: ProgramId,
    ) -> Result<Self, ProgressServiceError> {
        let confirmed = service.get_progress(&user_id, &program_id).await?;
        Ok(Self {
            service,
            user_id,
            program_id,
            confirmed,
            pending: None,
        })
    }

    /// What the UI should display: the pending record if any, else the
    /// confirmed one.
    #[must_use]
    pub fn current(&self) -> Option<&UserProgressRecord> {
        self.pending.as_ref().or(self.confirmed.as_ref())
    }

    #[must_use]
    pub fn confirmed(&self) -> Option<&UserProgressRecord> {
        self.confirmed.as_ref()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Compute the toggled record and hold it as pending.
    ///
    /// # Errors
    ///
    /// Propagates `ProgressService::preview_toggle` errors; the tracker state
    /// is unchanged in that case.
    pub async fn begin_toggle(
        &mut self,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<&UserProgressRecord, ProgressServiceError> {
        let record = self
            .service
            .preview_toggle(&self.user_id, &self.program_id, module_id, video_id)
            .await?;
        let pending: &UserProgressRecord = self.pending.insert(record);
        Ok(pending)
    }

    /// Persist the pending record. On failure the pending change is dropped
    /// and the confirmed record is shown again.
    ///
    /// # Errors
    ///
    /// Returns `NothingPending` without a prior `begin_toggle`, or the
    /// persistence error after reverting.
    pub async fn commit(&mut self) -> Result<&UserProgressRecord, ProgressServiceError> {
        let pending = self
            .pending
            .take()
            .ok_or(ProgressServiceError::NothingPending)?;

        match self.service.save(&pending).await {
            Ok(()) => {
                let confirmed: &UserProgressRecord = self.confirmed.insert(pending);
                Ok(confirmed)
            }
            Err(err) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    program_id = %self.program_id,
                    "reverting optimistic progress change"
                );
                Err(err)
            }
        }
    }

    /// `begin_toggle` followed by `commit`.
    ///
    /// # Errors
    ///
    /// See [`ProgressTracker::begin_toggle`] and [`ProgressTracker::commit`].
    pub async fn toggle(
        &mut self,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<&UserProgressRecord, ProgressServiceError> {
        self.begin_toggle(module_id, video_id).await?;
        self.commit().await
    }
}
