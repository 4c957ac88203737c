use std::sync::Arc;

use course_core::Clock;
use course_core::model::{
    CompletedVideos, ModuleId, ModuleTree, ProgramId, UserId, UserProgressRecord, VideoId,
};
use course_core::progress::{recompute_progress, toggle_in};
use serde::{Deserialize, Serialize};
use storage::repository::{ContentRepository, ProgressRepository, StorageError};

use crate::error::ProgressServiceError;

/// Fraction of a video that must be watched before playback counts as done.
///
/// This is caller policy: the aggregator only ever sees explicit toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WatchThreshold(u8);

impl WatchThreshold {
    /// Creates a threshold expressed as a whole percentage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::InvalidWatchThreshold` outside `1..=100`.
    pub fn new(percent: u8) -> Result<Self, ProgressServiceError> {
        if (1..=100).contains(&percent) {
            Ok(Self(percent))
        } else {
            Err(ProgressServiceError::InvalidWatchThreshold(percent))
        }
    }

    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }

    /// True once `position_secs` covers the threshold share of the video.
    /// Videos without a known duration never auto-complete.
    #[must_use]
    pub fn reached(self, position_secs: u32, duration_secs: u32) -> bool {
        if duration_secs == 0 {
            return false;
        }
        u64::from(position_secs) * 100 >= u64::from(self.0) * u64::from(duration_secs)
    }
}

impl Default for WatchThreshold {
    fn default() -> Self {
        Self(90)
    }
}

impl TryFrom<u8> for WatchThreshold {
    type Error = ProgressServiceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WatchThreshold> for u8 {
    fn from(value: WatchThreshold) -> Self {
        value.0
    }
}

/// Recomputes and persists per-user progress from authoritative state.
///
/// Every operation re-reads the live module tree and the stored completion
/// set, so derived percentages are never patched incrementally.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    content: Arc<dyn ContentRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        content: Arc<dyn ContentRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            content,
            progress,
        }
    }

    async fn live_tree(&self, program_id: &ProgramId) -> Result<ModuleTree, ProgressServiceError> {
        match self.content.get_program_module_tree(program_id).await {
            Ok(tree) => Ok(tree),
            Err(StorageError::NotFound) => {
                Err(ProgressServiceError::UnknownProgram(program_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn build_record(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        tree: &ModuleTree,
        completed: &CompletedVideos,
    ) -> UserProgressRecord {
        let snapshot = recompute_progress(program_id, tree, completed);
        tracing::debug!(
            %user_id,
            %program_id,
            program_progress = snapshot.program_progress,
            status = %snapshot.program_status,
            "progress recomputed"
        );
        UserProgressRecord::from_snapshot(
            user_id.clone(),
            program_id.clone(),
            snapshot,
            self.clock.now(),
        )
    }

    /// Compute the record that toggling `video_id` would produce, without
    /// writing it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProgram` or `UnknownVideo` when the ids are not in the
    /// live tree, or `Storage` if either store cannot be read.
    pub async fn preview_toggle(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<UserProgressRecord, ProgressServiceError> {
        self.preview_with(user_id, program_id, module_id, video_id, |completed| {
            toggle_in(completed, module_id, video_id)
        })
        .await
    }

    async fn preview_with(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
        change: impl FnOnce(&CompletedVideos) -> CompletedVideos,
    ) -> Result<UserProgressRecord, ProgressServiceError> {
        let tree = self.live_tree(program_id).await?;
        if !tree.contains_video(module_id, video_id) {
            return Err(ProgressServiceError::UnknownVideo {
                module_id: module_id.clone(),
                video_id: video_id.clone(),
            });
        }

        let current = self
            .progress
            .get_completed_videos(user_id, program_id)
            .await?;
        let next = change(&current);
        Ok(self.build_record(user_id, program_id, &tree, &next))
    }

    /// Merge-write a record to the user-profile store.
    ///
    /// Failures are logged here and returned to the caller; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the write fails.
    pub async fn save(&self, record: &UserProgressRecord) -> Result<(), ProgressServiceError> {
        if let Err(err) = self.progress.set_progress(record).await {
            tracing::warn!(
                user_id = %record.user_id(),
                program_id = %record.program_id(),
                error = %err,
                "failed to persist progress"
            );
            return Err(err.into());
        }
        Ok(())
    }

    /// Flip a video's completion state, recompute, and persist.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::preview_toggle`] and [`ProgressService::save`].
    pub async fn toggle_video(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<UserProgressRecord, ProgressServiceError> {
        let record = self
            .preview_toggle(user_id, program_id, module_id, video_id)
            .await?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Set a video's completion state explicitly.
    ///
    /// Idempotent: requesting the state the video is already in still
    /// recomputes and persists, which heals stale derived fields.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::toggle_video`].
    pub async fn set_video_completed(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
        completed: bool,
    ) -> Result<UserProgressRecord, ProgressServiceError> {
        let record = self
            .preview_with(user_id, program_id, module_id, video_id, |current| {
                if current.contains(module_id, video_id) == completed {
                    current.clone()
                } else {
                    toggle_in(current, module_id, video_id)
                }
            })
            .await?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Mark a video complete once playback crosses `threshold`.
    ///
    /// Returns `Ok(None)` when the threshold is not reached yet or the video
    /// is already complete; playback never un-completes a video.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::toggle_video`].
    pub async fn record_playback(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
        position_secs: u32,
        threshold: WatchThreshold,
    ) -> Result<Option<UserProgressRecord>, ProgressServiceError> {
        let program = self
            .content
            .get_program(program_id)
            .await?
            .ok_or_else(|| ProgressServiceError::UnknownProgram(program_id.clone()))?;
        let video = program
            .module(module_id)
            .and_then(|m| m.video(video_id))
            .ok_or_else(|| ProgressServiceError::UnknownVideo {
                module_id: module_id.clone(),
                video_id: video_id.clone(),
            })?;

        if !threshold.reached(position_secs, video.duration_secs()) {
            return Ok(None);
        }
        let already = self
            .progress
            .get_completed_videos(user_id, program_id)
            .await?
            .contains(module_id, video_id);
        if already {
            return Ok(None);
        }

        self.set_video_completed(user_id, program_id, module_id, video_id, true)
            .await
            .map(Some)
    }

    /// Recompute from the stored completion set without changing it.
    ///
    /// Used after modules or videos are added or deleted, since the
    /// denominator changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProgram` if the program is gone, or `Storage` on
    /// read/write failures.
    pub async fn refresh(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<UserProgressRecord, ProgressServiceError> {
        let tree = self.live_tree(program_id).await?;
        let completed = self
            .progress
            .get_completed_videos(user_id, program_id)
            .await?;
        let record = self.build_record(user_id, program_id, &tree, &completed);
        self.save(&record).await?;
        Ok(record)
    }

    /// Last persisted record, if any.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the store cannot be read.
    pub async fn get_progress(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<Option<UserProgressRecord>, ProgressServiceError> {
        Ok(self.progress.get_progress(user_id, program_id).await?)
    }

    /// Users holding a record for the program.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the store cannot be read.
    pub async fn users_with_progress(
        &self,
        program_id: &ProgramId,
    ) -> Result<Vec<UserId>, ProgressServiceError> {
        Ok(self.progress.list_users_with_progress(program_id).await?)
    }
}
