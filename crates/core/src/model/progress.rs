use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ModuleId, ProgramId, UserId, VideoId};

//
// ─── MODULE TREE ───────────────────────────────────────────────────────────────
//

/// Id-only view of a program: module id to the set of its video ids.
///
/// This is what the content store hands to the aggregator. It must be read
/// fresh for every computation because modules and videos can be deleted in
/// between.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleTree(BTreeMap<ModuleId, BTreeSet<VideoId>>);

impl ModuleTree {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Registers a module, keeping its videos if it is already present.
    pub fn insert_module(&mut self, module_id: ModuleId) {
        self.0.entry(module_id).or_default();
    }

    /// Adds a video to a module, registering the module if needed.
    pub fn insert_video(&mut self, module_id: ModuleId, video_id: VideoId) {
        self.0.entry(module_id).or_default().insert(video_id);
    }

    #[must_use]
    pub fn videos(&self, module_id: &ModuleId) -> Option<&BTreeSet<VideoId>> {
        self.0.get(module_id)
    }

    #[must_use]
    pub fn contains_module(&self, module_id: &ModuleId) -> bool {
        self.0.contains_key(module_id)
    }

    #[must_use]
    pub fn contains_video(&self, module_id: &ModuleId, video_id: &VideoId) -> bool {
        self.0
            .get(module_id)
            .is_some_and(|videos| videos.contains(video_id))
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn total_videos(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &BTreeSet<VideoId>)> {
        self.0.iter()
    }
}

impl<M, V, I> FromIterator<(M, I)> for ModuleTree
where
    M: Into<ModuleId>,
    V: Into<VideoId>,
    I: IntoIterator<Item = V>,
{
    fn from_iter<T: IntoIterator<Item = (M, I)>>(iter: T) -> Self {
        let mut tree = Self::new();
        for (module_id, videos) in iter {
            let module_id = module_id.into();
            tree.insert_module(module_id.clone());
            for video_id in videos {
                tree.insert_video(module_id.clone(), video_id.into());
            }
        }
        tree
    }
}

//
// ─── COMPLETION SET ────────────────────────────────────────────────────────────
//

/// Per-module sets of video ids a user has marked complete.
///
/// May reference videos or modules that no longer exist; the aggregator prunes
/// those on every recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedVideos(BTreeMap<ModuleId, BTreeSet<VideoId>>);

impl CompletedVideos {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Completion set for one module; empty when nothing is recorded.
    #[must_use]
    pub fn module(&self, module_id: &ModuleId) -> BTreeSet<VideoId> {
        self.0.get(module_id).cloned().unwrap_or_default()
    }

    /// Replaces the completion set for one module. An empty set removes the
    /// module entry entirely.
    pub fn set_module(&mut self, module_id: ModuleId, videos: BTreeSet<VideoId>) {
        if videos.is_empty() {
            self.0.remove(&module_id);
        } else {
            self.0.insert(module_id, videos);
        }
    }

    #[must_use]
    pub fn contains(&self, module_id: &ModuleId, video_id: &VideoId) -> bool {
        self.0
            .get(module_id)
            .is_some_and(|videos| videos.contains(video_id))
    }

    /// Number of completed ids across all modules, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleId, &BTreeSet<VideoId>)> {
        self.0.iter()
    }
}

impl<M, V, I> FromIterator<(M, I)> for CompletedVideos
where
    M: Into<ModuleId>,
    V: Into<VideoId>,
    I: IntoIterator<Item = V>,
{
    fn from_iter<T: IntoIterator<Item = (M, I)>>(iter: T) -> Self {
        let mut completed = Self::new();
        for (module_id, videos) in iter {
            let module_id = module_id.into();
            let mut set = completed.module(&module_id);
            set.extend(videos.into_iter().map(Into::into));
            completed.set_module(module_id, set);
        }
        completed
    }
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid program status: {0}")]
pub struct ProgramStatusParseError(String);

/// Derived program state: completed iff overall progress is 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramStatus {
    #[default]
    Active,
    Completed,
}

impl ProgramStatus {
    #[must_use]
    pub fn from_progress(program_progress: u8) -> Self {
        if program_progress == 100 {
            Self::Completed
        } else {
            Self::Active
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramStatus {
    type Err = ProgramStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(ProgramStatusParseError(other.to_owned())),
        }
    }
}

//
// ─── SNAPSHOT / RECORD ─────────────────────────────────────────────────────────
//

/// Output of a recompute: derived percentages plus the pruned completion set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub module_progress: BTreeMap<ModuleId, u8>,
    pub program_progress: u8,
    pub program_status: ProgramStatus,
    pub pruned_completed_videos: CompletedVideos,
}

/// Persisted progress for one (user, program) pair.
///
/// Fields other than the ids and timestamp are only ever produced from a
/// `ProgressSnapshot`, so they cannot drift from the completion set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgressRecord {
    user_id: UserId,
    program_id: ProgramId,
    completed_videos: CompletedVideos,
    module_progress: BTreeMap<ModuleId, u8>,
    program_progress: u8,
    program_status: ProgramStatus,
    updated_at: DateTime<Utc>,
}

impl UserProgressRecord {
    #[must_use]
    pub fn from_snapshot(
        user_id: UserId,
        program_id: ProgramId,
        snapshot: ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            program_id,
            completed_videos: snapshot.pruned_completed_videos,
            module_progress: snapshot.module_progress,
            program_progress: snapshot.program_progress,
            program_status: snapshot.program_status,
            updated_at,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn program_id(&self) -> &ProgramId {
        &self.program_id
    }

    #[must_use]
    pub fn completed_videos(&self) -> &CompletedVideos {
        &self.completed_videos
    }

    #[must_use]
    pub fn module_progress(&self) -> &BTreeMap<ModuleId, u8> {
        &self.module_progress
    }

    #[must_use]
    pub fn program_progress(&self) -> u8 {
        self.program_progress
    }

    #[must_use]
    pub fn program_status(&self) -> ProgramStatus {
        self.program_status
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Derived fields as a snapshot, e.g. to compare against a fresh recompute.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            module_progress: self.module_progress.clone(),
            program_progress: self.program_progress,
            program_status: self.program_status,
            pruned_completed_videos: self.completed_videos.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_set_drops_entry() {
        let mut completed: CompletedVideos = [("a", ["v1"])].into_iter().collect();
        assert_eq!(completed.len(), 1);
        completed.set_module(ModuleId::new("a"), BTreeSet::new());
        assert!(completed.is_empty());
        assert_eq!(completed.iter().count(), 0);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [ProgramStatus::Active, ProgramStatus::Completed] {
            assert_eq!(status.as_str().parse::<ProgramStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ProgramStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ProgramStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn status_from_progress_only_completes_at_100() {
        assert_eq!(ProgramStatus::from_progress(99), ProgramStatus::Active);
        assert_eq!(ProgramStatus::from_progress(100), ProgramStatus::Completed);
        assert_eq!(ProgramStatus::from_progress(0), ProgramStatus::Active);
    }

    #[test]
    fn tree_collects_from_pairs() {
        let tree: ModuleTree = [("a", vec!["v1", "v2"]), ("b", vec![])].into_iter().collect();
        assert_eq!(tree.module_count(), 2);
        assert_eq!(tree.total_videos(), 2);
        assert!(tree.contains_module(&ModuleId::new("b")));
        assert!(!tree.contains_video(&ModuleId::new("b"), &VideoId::new("v1")));
    }
}
