use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ModuleId, ProgramId, VideoId};
use crate::model::progress::ModuleTree;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgramError {
    #[error("program name cannot be empty")]
    EmptyName,

    #[error("module title cannot be empty")]
    EmptyModuleTitle,

    #[error("video title cannot be empty")]
    EmptyVideoTitle,

    #[error("checklist item {index} cannot be empty")]
    EmptyChecklistItem { index: usize },

    #[error("module {0} does not belong to this program")]
    UnknownModule(ModuleId),
}

fn trimmed_non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

//
// ─── VIDEO ─────────────────────────────────────────────────────────────────────
//

/// A single trackable unit of content inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    id: VideoId,
    title: String,
    duration_secs: u32,
    display_order: i32,
    position: u64,
    document: Option<String>,
    checklist: Vec<String>,
}

impl Video {
    /// Creates a new Video.
    ///
    /// `position` is the insertion sequence assigned by the content store; it
    /// breaks ties between videos sharing a `display_order`.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::EmptyVideoTitle` for a blank title and
    /// `ProgramError::EmptyChecklistItem` for a blank checklist entry.
    pub fn new(
        id: VideoId,
        title: impl Into<String>,
        duration_secs: u32,
        display_order: i32,
        position: u64,
        document: Option<String>,
        checklist: Vec<String>,
    ) -> Result<Self, ProgramError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ProgramError::EmptyVideoTitle);
        }

        let mut items = Vec::with_capacity(checklist.len());
        for (index, item) in checklist.into_iter().enumerate() {
            let item = item.trim();
            if item.is_empty() {
                return Err(ProgramError::EmptyChecklistItem { index });
            }
            items.push(item.to_owned());
        }

        Ok(Self {
            id,
            title: title.trim().to_owned(),
            duration_secs,
            display_order,
            position,
            document: trimmed_non_empty(document),
            checklist: items,
        })
    }

    #[must_use]
    pub fn id(&self) -> &VideoId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    #[must_use]
    pub fn display_order(&self) -> i32 {
        self.display_order
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reference to the supporting document, if one is attached.
    #[must_use]
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Checklist items in display order; empty when the video has none.
    #[must_use]
    pub fn checklist(&self) -> &[String] {
        &self.checklist
    }
}

//
// ─── MODULE ────────────────────────────────────────────────────────────────────
//

/// A named, ordered group of videos within a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    id: ModuleId,
    title: String,
    description: Option<String>,
    display_order: i32,
    position: u64,
    videos: BTreeMap<VideoId, Video>,
}

impl Module {
    /// Creates an empty Module.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::EmptyModuleTitle` if the title is blank.
    pub fn new(
        id: ModuleId,
        title: impl Into<String>,
        description: Option<String>,
        display_order: i32,
        position: u64,
    ) -> Result<Self, ProgramError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ProgramError::EmptyModuleTitle);
        }

        Ok(Self {
            id,
            title: title.trim().to_owned(),
            description: trimmed_non_empty(description),
            display_order,
            position,
            videos: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn display_order(&self) -> i32 {
        self.display_order
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Adds or replaces a video keyed by its id.
    pub fn insert_video(&mut self, video: Video) {
        self.videos.insert(video.id().clone(), video);
    }

    /// Removes a video, returning it if it existed.
    pub fn remove_video(&mut self, id: &VideoId) -> Option<Video> {
        self.videos.remove(id)
    }

    #[must_use]
    pub fn video(&self, id: &VideoId) -> Option<&Video> {
        self.videos.get(id)
    }

    #[must_use]
    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    /// Videos sorted by display order, ties broken by insertion sequence.
    #[must_use]
    pub fn videos_in_order(&self) -> Vec<&Video> {
        let mut videos: Vec<&Video> = self.videos.values().collect();
        videos.sort_by_key(|v| (v.display_order, v.position));
        videos
    }

    pub fn video_ids(&self) -> impl Iterator<Item = &VideoId> {
        self.videos.keys()
    }
}

//
// ─── PROGRAM ───────────────────────────────────────────────────────────────────
//

/// Top-level course entity owning its modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    id: ProgramId,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    modules: BTreeMap<ModuleId, Module>,
}

impl Program {
    /// Creates a program with no modules.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::EmptyName` if name is empty or whitespace-only.
    pub fn new(
        id: ProgramId,
        name: impl Into<String>,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ProgramError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProgramError::EmptyName);
        }

        Ok(Self {
            id,
            name: name.trim().to_owned(),
            description: trimmed_non_empty(description),
            created_at,
            modules: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &ProgramId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn insert_module(&mut self, module: Module) {
        self.modules.insert(module.id().clone(), module);
    }

    pub fn remove_module(&mut self, id: &ModuleId) -> Option<Module> {
        self.modules.remove(id)
    }

    #[must_use]
    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Adds a video to one of this program's modules.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::UnknownModule` if the module is not part of the program.
    pub fn insert_video(&mut self, module_id: &ModuleId, video: Video) -> Result<(), ProgramError> {
        let module = self
            .modules
            .get_mut(module_id)
            .ok_or_else(|| ProgramError::UnknownModule(module_id.clone()))?;
        module.insert_video(video);
        Ok(())
    }

    /// Modules sorted by display order, ties broken by insertion sequence.
    #[must_use]
    pub fn modules_in_order(&self) -> Vec<&Module> {
        let mut modules: Vec<&Module> = self.modules.values().collect();
        modules.sort_by_key(|m| (m.display_order, m.position));
        modules
    }

    #[must_use]
    pub fn total_videos(&self) -> usize {
        self.modules.values().map(Module::video_count).sum()
    }

    /// Projects the program onto the id-only tree the aggregator consumes.
    #[must_use]
    pub fn module_tree(&self) -> ModuleTree {
        let mut tree = ModuleTree::new();
        for module in self.modules.values() {
            tree.insert_module(module.id().clone());
            for video_id in module.video_ids() {
                tree.insert_video(module.id().clone(), video_id.clone());
            }
        }
        tree
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
