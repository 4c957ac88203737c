//! Completion aggregation for a program's module/video tree.
//!
//! Everything here is pure: callers fetch the live tree and the user's
//! completion set, call [`recompute_progress`], and persist the snapshot
//! themselves.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    CompletedVideos, ModuleId, ModuleTree, ProgramId, ProgramStatus, ProgressSnapshot, VideoId,
};

/// Rounds `100 * completed / total` half away from zero.
///
/// Uses integer arithmetic on the exact ratio so the result is rounded once.
/// Returns 0 when `total` is 0 and never exceeds 100 as long as
/// `completed <= total`.
#[must_use]
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    // (100c / t) + 1/2, floored: (200c + t) / 2t
    let rounded = (200 * completed + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Recomputes module and program progress from the live tree.
///
/// Completed ids that are not in `module_tree` are pruned, and modules that
/// no longer exist contribute nothing. The result does not depend on
/// iteration order, and calling it again with the pruned set yields the
/// same snapshot.
///
/// # Examples
///
/// ```
/// # use course_core::model::{CompletedVideos, ModuleTree, ProgramId, ProgramStatus};
/// # use course_core::progress::recompute_progress;
/// let tree: ModuleTree = [("A", vec!["v1", "v2", "v3", "v4"]), ("B", vec!["v5", "v6"])]
///     .into_iter()
///     .collect();
/// let done: CompletedVideos = [("A", vec!["v1", "v2"]), ("B", vec!["v5"])].into_iter().collect();
///
/// let snapshot = recompute_progress(&ProgramId::new("p"), &tree, &done);
/// assert_eq!(snapshot.program_progress, 50);
/// assert_eq!(snapshot.program_status, ProgramStatus::Active);
/// ```
#[must_use]
pub fn recompute_progress(
    _program_id: &ProgramId,
    module_tree: &ModuleTree,
    completed_videos: &CompletedVideos,
) -> ProgressSnapshot {
    let mut module_progress = BTreeMap::new();
    let mut pruned = CompletedVideos::new();
    let mut total_sum = 0usize;
    let mut completed_sum = 0usize;

    for (module_id, videos) in module_tree.iter() {
        let valid: BTreeSet<VideoId> = completed_videos
            .module(module_id)
            .into_iter()
            .filter(|video_id| videos.contains(video_id))
            .collect();

        module_progress.insert(module_id.clone(), percent(valid.len(), videos.len()));
        total_sum += videos.len();
        completed_sum += valid.len();
        pruned.set_module(module_id.clone(), valid);
    }

    let program_progress = percent(completed_sum, total_sum);

    ProgressSnapshot {
        module_progress,
        program_progress,
        program_status: ProgramStatus::from_progress(program_progress),
        pruned_completed_videos: pruned,
    }
}

/// Flips one video's completion state within a module's set.
///
/// Marking complete and incomplete are symmetric: applying the toggle twice
/// returns the original set.
///
/// Takes only the module's set, not the program id, module id or live tree.
/// Checking that the video belongs to the live tree is the caller's job;
/// `ProgressService` rejects unknown videos with `UnknownVideo` before any
/// toggle, and [`recompute_progress`] prunes anything stale afterwards.
#[must_use]
pub fn toggle_video_completion(
    current_completed: &BTreeSet<VideoId>,
    video_id: &VideoId,
) -> BTreeSet<VideoId> {
    let mut next = current_completed.clone();
    if !next.remove(video_id) {
        next.insert(video_id.clone());
    }
    next
}

/// Applies [`toggle_video_completion`] to one module of a full completion set.
#[must_use]
pub fn toggle_in(
    completed_videos: &CompletedVideos,
    module_id: &ModuleId,
    video_id: &VideoId,
) -> CompletedVideos {
    let mut next = completed_videos.clone();
    let module_set = toggle_video_completion(&completed_videos.module(module_id), video_id);
    next.set_module(module_id.clone(), module_set);
    next
}
