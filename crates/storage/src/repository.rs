use async_trait::async_trait;
use course_core::model::{
    CompletedVideos, Module, ModuleId, ModuleTree, Program, ProgramId, UserId, UserProgressRecord,
    Video, VideoId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Insert shape for a module; the store assigns the insertion sequence.
#[derive(Debug, Clone)]
pub struct NewModuleRecord {
    pub id: ModuleId,
    pub title: String,
    pub description: Option<String>,
    pub display_order: i32,
}

impl NewModuleRecord {
    #[must_use]
    pub fn from_module(module: &Module) -> Self {
        Self {
            id: module.id().clone(),
            title: module.title().to_owned(),
            description: module.description().map(str::to_owned),
            display_order: module.display_order(),
        }
    }

    /// Rebuild the domain module once the store has picked a position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the record no longer validates.
    pub fn into_module(self, position: u64) -> Result<Module, StorageError> {
        Module::new(
            self.id,
            self.title,
            self.description,
            self.display_order,
            position,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Insert shape for a video; the store assigns the insertion sequence.
#[derive(Debug, Clone)]
pub struct NewVideoRecord {
    pub id: VideoId,
    pub title: String,
    pub duration_secs: u32,
    pub display_order: i32,
    pub document: Option<String>,
    pub checklist: Vec<String>,
}

impl NewVideoRecord {
    #[must_use]
    pub fn from_video(video: &Video) -> Self {
        Self {
            id: video.id().clone(),
            title: video.title().to_owned(),
            duration_secs: video.duration_secs(),
            display_order: video.display_order(),
            document: video.document().map(str::to_owned),
            checklist: video.checklist().to_vec(),
        }
    }

    /// Rebuild the domain video once the store has picked a position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the record no longer validates.
    pub fn into_video(self, position: u64) -> Result<Video, StorageError> {
        Video::new(
            self.id,
            self.title,
            self.duration_secs,
            self.display_order,
            position,
            self.document,
            self.checklist,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Content store: programs, their modules and videos.
///
/// Reads must observe prior writes made through the same repository, since the
/// progress aggregator relies on the tree reflecting deletions immediately.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Persist a new program (without modules).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is taken.
    async fn insert_program(&self, program: &Program) -> Result<(), StorageError>;

    /// Fetch a program with all of its modules and videos.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get_program(&self, id: &ProgramId) -> Result<Option<Program>, StorageError>;

    /// List programs ordered by creation time, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn list_programs(&self, limit: u32) -> Result<Vec<Program>, StorageError>;

    /// Add a module to a program.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the program is missing and
    /// `StorageError::Conflict` if the module id is already used in it.
    async fn insert_module(
        &self,
        program_id: &ProgramId,
        module: NewModuleRecord,
    ) -> Result<(), StorageError>;

    /// Add a video to a module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the program or module is missing and
    /// `StorageError::Conflict` if the video id is already used in the module.
    async fn insert_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video: NewVideoRecord,
    ) -> Result<(), StorageError>;

    /// Delete a module together with its videos.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the module does not exist.
    async fn delete_module(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
    ) -> Result<(), StorageError>;

    /// Delete a single video.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the video does not exist.
    async fn delete_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<(), StorageError>;

    /// Id-only view of the live module/video tree.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the program does not exist.
    async fn get_program_module_tree(
        &self,
        program_id: &ProgramId,
    ) -> Result<ModuleTree, StorageError>;
}

/// User-profile store for per-program progress.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Completion set for a user/program; empty when nothing is stored yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get_completed_videos(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<CompletedVideos, StorageError>;

    /// Full progress record for a user/program, if one was written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get_progress(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<Option<UserProgressRecord>, StorageError>;

    /// Merge-write the record: replaces the progress fields of this
    /// (user, program) pair and leaves everything else untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn set_progress(&self, record: &UserProgressRecord) -> Result<(), StorageError>;

    /// Users that hold a progress record for the program.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn list_users_with_progress(
        &self,
        program_id: &ProgramId,
    ) -> Result<Vec<UserId>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    programs: Arc<Mutex<HashMap<ProgramId, Program>>>,
    progress: Arc<Mutex<HashMap<(UserId, ProgramId), UserProgressRecord>>>,
    next_position: Arc<AtomicU64>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_position(&self) -> u64 {
        self.next_position.fetch_add(1, Ordering::Relaxed)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn insert_program(&self, program: &Program) -> Result<(), StorageError> {
        let mut guard = self.programs.lock().map_err(poisoned)?;
        if guard.contains_key(program.id()) {
            return Err(StorageError::Conflict);
        }
        guard.insert(program.id().clone(), program.clone());
        Ok(())
    }

    async fn get_program(&self, id: &ProgramId) -> Result<Option<Program>, StorageError> {
        let guard = self.programs.lock().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn list_programs(&self, limit: u32) -> Result<Vec<Program>, StorageError> {
        let guard = self.programs.lock().map_err(poisoned)?;
        let mut programs: Vec<Program> = guard.values().cloned().collect();
        programs.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        programs.truncate(limit as usize);
        Ok(programs)
    }

    async fn insert_module(
        &self,
        program_id: &ProgramId,
        module: NewModuleRecord,
    ) -> Result<(), StorageError> {
        let position = self.next_position();
        let mut guard = self.programs.lock().map_err(poisoned)?;
        let program = guard.get_mut(program_id).ok_or(StorageError::NotFound)?;
        if program.module(&module.id).is_some() {
            return Err(StorageError::Conflict);
        }
        program.insert_module(module.into_module(position)?);
        Ok(())
    }

    async fn insert_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video: NewVideoRecord,
    ) -> Result<(), StorageError> {
        let position = self.next_position();
        let mut guard = self.programs.lock().map_err(poisoned)?;
        let program = guard.get_mut(program_id).ok_or(StorageError::NotFound)?;
        let module = program.module(module_id).ok_or(StorageError::NotFound)?;
        if module.video(&video.id).is_some() {
            return Err(StorageError::Conflict);
        }
        program
            .insert_video(module_id, video.into_video(position)?)
            .map_err(|_| StorageError::NotFound)
    }

    async fn delete_module(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
    ) -> Result<(), StorageError> {
        let mut guard = self.programs.lock().map_err(poisoned)?;
        let program = guard.get_mut(program_id).ok_or(StorageError::NotFound)?;
        program
            .remove_module(module_id)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    async fn delete_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<(), StorageError> {
        let mut guard = self.programs.lock().map_err(poisoned)?;
        let program = guard.get_mut(program_id).ok_or(StorageError::NotFound)?;
        let mut module = program
            .remove_module(module_id)
            .ok_or(StorageError::NotFound)?;
        let removed = module.remove_video(video_id);
        program.insert_module(module);
        removed.map(|_| ()).ok_or(StorageError::NotFound)
    }

    async fn get_program_module_tree(
        &self,
        program_id: &ProgramId,
    ) -> Result<ModuleTree, StorageError> {
        let guard = self.programs.lock().map_err(poisoned)?;
        guard
            .get(program_id)
            .map(Program::module_tree)
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_completed_videos(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<CompletedVideos, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard
            .get(&(user_id.clone(), program_id.clone()))
            .map(|record| record.completed_videos().clone())
            .unwrap_or_default())
    }

    async fn get_progress(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<Option<UserProgressRecord>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(&(user_id.clone(), program_id.clone())).cloned())
    }

    async fn set_progress(&self, record: &UserProgressRecord) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        guard.insert(
            (record.user_id().clone(), record.program_id().clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn list_users_with_progress(
        &self,
        program_id: &ProgramId,
    ) -> Result<Vec<UserId>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        let mut users: Vec<UserId> = guard
            .keys()
            .filter(|(_, pid)| pid == program_id)
            .map(|(uid, _)| uid.clone())
            .collect();
        users.sort();
        Ok(users)
    }
}

/// Aggregates the content and progress repositories behind trait objects for
/// easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub content: Arc<dyn ContentRepository>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let content: Arc<dyn ContentRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo);
        Self { content, progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::ProgressSnapshot;
    use course_core::progress::recompute_progress;
    use course_core::time::fixed_now;

    fn program(id: &str) -> Program {
        Program::new(ProgramId::new(id), format!("Program {id}"), None, fixed_now()).unwrap()
    }

    fn module(id: &str, order: i32) -> NewModuleRecord {
        NewModuleRecord {
            id: ModuleId::new(id),
            title: format!("Module {id}"),
            description: None,
            display_order: order,
        }
    }

    fn video(id: &str) -> NewVideoRecord {
        NewVideoRecord {
            id: VideoId::new(id),
            title: format!("Video {id}"),
            duration_secs: 90,
            display_order: 0,
            document: None,
            checklist: vec![],
        }
    }

    #[tokio::test]
    async fn tree_reflects_deletions_immediately() {
        let repo = InMemoryRepository::new();
        let pid = ProgramId::new("p");
        repo.insert_program(&program("p")).await.unwrap();
        repo.insert_module(&pid, module("A", 0)).await.unwrap();
        repo.insert_video(&pid, &ModuleId::new("A"), video("v1"))
            .await
            .unwrap();
        repo.insert_video(&pid, &ModuleId::new("A"), video("v2"))
            .await
            .unwrap();

        assert_eq!(repo.get_program_module_tree(&pid).await.unwrap().total_videos(), 2);

        repo.delete_video(&pid, &ModuleId::new("A"), &VideoId::new("v1"))
            .await
            .unwrap();
        let tree = repo.get_program_module_tree(&pid).await.unwrap();
        assert_eq!(tree.total_videos(), 1);
        assert!(!tree.contains_video(&ModuleId::new("A"), &VideoId::new("v1")));
    }

    #[tokio::test]
    async fn duplicate_ids_conflict_and_missing_parents_are_not_found() {
        let repo = InMemoryRepository::new();
        let pid = ProgramId::new("p");
        repo.insert_program(&program("p")).await.unwrap();
        assert!(matches!(
            repo.insert_program(&program("p")).await,
            Err(StorageError::Conflict)
        ));

        repo.insert_module(&pid, module("A", 0)).await.unwrap();
        assert!(matches!(
            repo.insert_module(&pid, module("A", 1)).await,
            Err(StorageError::Conflict)
        ));
        assert!(matches!(
            repo.insert_video(&pid, &ModuleId::new("missing"), video("v"))
                .await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            repo.delete_module(&ProgramId::new("nope"), &ModuleId::new("A"))
                .await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            repo.delete_video(&pid, &ModuleId::new("A"), &VideoId::new("ghost"))
                .await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn progress_round_trips_and_lists_users() {
        let repo = InMemoryRepository::new();
        let pid = ProgramId::new("p");
        let tree: ModuleTree = [("A", vec!["v1", "v2"])].into_iter().collect();
        let done: CompletedVideos = [("A", vec!["v1"])].into_iter().collect();
        let snapshot: ProgressSnapshot = recompute_progress(&pid, &tree, &done);

        for user in ["bob", "ana"] {
            let record = UserProgressRecord::from_snapshot(
                UserId::new(user),
                pid.clone(),
                snapshot.clone(),
                fixed_now(),
            );
            repo.set_progress(&record).await.unwrap();
        }

        let stored = repo
            .get_progress(&UserId::new("ana"), &pid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.program_progress(), 50);
        assert_eq!(
            repo.get_completed_videos(&UserId::new("ana"), &pid)
                .await
                .unwrap(),
            done
        );
        assert!(
            repo.get_completed_videos(&UserId::new("carl"), &pid)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            repo.list_users_with_progress(&pid).await.unwrap(),
            vec![UserId::new("ana"), UserId::new("bob")]
        );
    }

    #[tokio::test]
    async fn insertion_sequence_breaks_display_order_ties() {
        let repo = InMemoryRepository::new();
        let pid = ProgramId::new("p");
        repo.insert_program(&program("p")).await.unwrap();
        repo.insert_module(&pid, module("second", 1)).await.unwrap();
        repo.insert_module(&pid, module("first", 1)).await.unwrap();
        repo.insert_module(&pid, module("zero", 0)).await.unwrap();

        let program = repo.get_program(&pid).await.unwrap().unwrap();
        let ids: Vec<&str> = program
            .modules_in_order()
            .into_iter()
            .map(|m| m.id().as_str())
            .collect();
        assert_eq!(ids, ["zero", "second", "first"]);
    }
}
