use std::sync::Arc;

use course_core::Clock;
use course_core::model::{Module, ModuleId, Program, ProgramId, UserId, Video, VideoId};
use serde::Serialize;
use storage::repository::{ContentRepository, NewModuleRecord, NewVideoRecord};

use crate::error::CourseServiceError;
use crate::progress_service::ProgressService;

/// Input for a new program. A missing id is generated.
#[derive(Debug, Clone, Default)]
pub struct NewProgram {
    pub id: Option<ProgramId>,
    pub name: String,
    pub description: Option<String>,
}

/// Input for a new module. A missing id is generated.
#[derive(Debug, Clone, Default)]
pub struct NewModule {
    pub id: Option<ModuleId>,
    pub title: String,
    pub description: Option<String>,
    pub display_order: i32,
}

/// Input for a new video. A missing id is generated.
#[derive(Debug, Clone, Default)]
pub struct NewVideo {
    pub id: Option<VideoId>,
    pub title: String,
    pub duration_secs: u32,
    pub display_order: i32,
    pub document: Option<String>,
    pub checklist: Vec<String>,
}

/// Outcome of re-deriving progress for every enrolled user after a content
/// change. The content change itself is already committed; failures here
/// only mean some stored records still reflect the old tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
    pub refreshed: Vec<UserId>,
    pub failed: Vec<(UserId, String)>,
    /// Set when enrolled users could not be listed, so nobody was refreshed.
    pub lookup_error: Option<String>,
}

impl RecomputeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.lookup_error.is_none()
    }
}

/// Manages program content and keeps stored progress consistent with it.
#[derive(Clone)]
pub struct CourseService {
    clock: Clock,
    content: Arc<dyn ContentRepository>,
    progress: Arc<ProgressService>,
}

impl CourseService {
    #[must_use]
    pub fn new(
        clock: Clock,
        content: Arc<dyn ContentRepository>,
        progress: Arc<ProgressService>,
    ) -> Self {
        Self {
            clock,
            content,
            progress,
        }
    }

    /// Create and persist an empty program.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Program` for validation failures.
    /// Returns `CourseServiceError::Storage` if persistence fails.
    pub async fn create_program(&self, input: NewProgram) -> Result<ProgramId, CourseServiceError> {
        let id = input.id.unwrap_or_else(ProgramId::generate);
        let program = Program::new(id, input.name, input.description, self.clock.now())?;
        self.content.insert_program(&program).await?;
        tracing::info!(program_id = %program.id(), name = program.name(), "program created");
        Ok(program.id().clone())
    }

    /// Fetch a program with its modules and videos.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` if repository access fails.
    pub async fn get_program(
        &self,
        program_id: &ProgramId,
    ) -> Result<Option<Program>, CourseServiceError> {
        Ok(self.content.get_program(program_id).await?)
    }

    /// List programs ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` if repository access fails.
    pub async fn list_programs(&self, limit: u32) -> Result<Vec<Program>, CourseServiceError> {
        Ok(self.content.list_programs(limit).await?)
    }

    /// Add a module and re-derive progress for enrolled users.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Program` for validation failures.
    /// Returns `CourseServiceError::Storage` if the program is missing or
    /// persistence fails.
    pub async fn add_module(
        &self,
        program_id: &ProgramId,
        input: NewModule,
    ) -> Result<(ModuleId, RecomputeReport), CourseServiceError> {
        let id = input.id.unwrap_or_else(ModuleId::generate);
        let module = Module::new(id, input.title, input.description, input.display_order, 0)?;
        self.content
            .insert_module(program_id, NewModuleRecord::from_module(&module))
            .await?;
        tracing::info!(%program_id, module_id = %module.id(), "module added");

        let report = self.recompute_all(program_id).await;
        Ok((module.id().clone(), report))
    }

    /// Add a video and re-derive progress for enrolled users.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Program` for validation failures.
    /// Returns `CourseServiceError::Storage` if the module is missing or
    /// persistence fails.
    pub async fn add_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        input: NewVideo,
    ) -> Result<(VideoId, RecomputeReport), CourseServiceError> {
        let id = input.id.unwrap_or_else(VideoId::generate);
        let video = Video::new(
            id,
            input.title,
            input.duration_secs,
            input.display_order,
            0,
            input.document,
            input.checklist,
        )?;
        self.content
            .insert_video(program_id, module_id, NewVideoRecord::from_video(&video))
            .await?;
        tracing::info!(%program_id, %module_id, video_id = %video.id(), "video added");

        let report = self.recompute_all(program_id).await;
        Ok((video.id().clone(), report))
    }

    /// Delete a video and prune it from every user's progress.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` (`NotFound`) if the video does
    /// not exist, or if repository access fails.
    pub async fn delete_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<RecomputeReport, CourseServiceError> {
        self.content
            .delete_video(program_id, module_id, video_id)
            .await?;
        tracing::info!(%program_id, %module_id, %video_id, "video deleted");
        Ok(self.recompute_all(program_id).await)
    }

    /// Delete a module with its videos and prune them from every user's
    /// progress.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` (`NotFound`) if the module does
    /// not exist, or if repository access fails.
    pub async fn delete_module(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
    ) -> Result<RecomputeReport, CourseServiceError> {
        self.content.delete_module(program_id, module_id).await?;
        tracing::info!(%program_id, %module_id, "module deleted");
        Ok(self.recompute_all(program_id).await)
    }

    async fn recompute_all(&self, program_id: &ProgramId) -> RecomputeReport {
        let mut report = RecomputeReport::default();
        let users = match self.progress.users_with_progress(program_id).await {
            Ok(users) => users,
            Err(err) => {
                tracing::warn!(%program_id, error = %err, "cannot list users to refresh");
                report.lookup_error = Some(err.to_string());
                return report;
            }
        };

        for user_id in users {
            match self.progress.refresh(&user_id, program_id).await {
                Ok(_) => report.refreshed.push(user_id),
                Err(err) => {
                    tracing::warn!(%user_id, %program_id, error = %err, "progress refresh failed");
                    report.failed.push((user_id, err.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use course_core::model::{CompletedVideos, UserProgressRecord};
    use course_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, ProgressRepository, StorageError};

    /// Profile store whose user listing is unavailable.
    struct UnlistedProgress(InMemoryRepository);

    #[async_trait]
    impl ProgressRepository for UnlistedProgress {
        async fn get_completed_videos(
            &self,
            user_id: &UserId,
            program_id: &ProgramId,
        ) -> Result<CompletedVideos, StorageError> {
            self.0.get_completed_videos(user_id, program_id).await
        }

        async fn get_progress(
            &self,
            user_id: &UserId,
            program_id: &ProgramId,
        ) -> Result<Option<UserProgressRecord>, StorageError> {
            self.0.get_progress(user_id, program_id).await
        }

        async fn set_progress(&self, record: &UserProgressRecord) -> Result<(), StorageError> {
            self.0.set_progress(record).await
        }

        async fn list_users_with_progress(
            &self,
            _program_id: &ProgramId,
        ) -> Result<Vec<UserId>, StorageError> {
            Err(StorageError::Connection("profile store offline".into()))
        }
    }

    fn services() -> (CourseService, Arc<ProgressService>) {
        let repo = InMemoryRepository::new();
        let progress = Arc::new(ProgressService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        let course = CourseService::new(fixed_clock(), Arc::new(repo), Arc::clone(&progress));
        (course, progress)
    }

    fn named_module(id: &str, order: i32) -> NewModule {
        NewModule {
            id: Some(ModuleId::new(id)),
            title: format!("Module {id}"),
            display_order: order,
            ..NewModule::default()
        }
    }

    fn named_video(id: &str) -> NewVideo {
        NewVideo {
            id: Some(VideoId::new(id)),
            title: format!("Video {id}"),
            duration_secs: 60,
            ..NewVideo::default()
        }
    }

    #[tokio::test]
    async fn create_program_rejects_blank_name() {
        let (course, _) = services();
        let err = course
            .create_program(NewProgram {
                name: "  ".into(),
                ..NewProgram::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CourseServiceError::Program(_)));
    }

    #[tokio::test]
    async fn generated_ids_are_returned() {
        let (course, _) = services();
        let pid = course
            .create_program(NewProgram {
                name: "Hydration".into(),
                ..NewProgram::default()
            })
            .await
            .unwrap();
        let (mid, report) = course
            .add_module(
                &pid,
                NewModule {
                    title: "Basics".into(),
                    ..NewModule::default()
                },
            )
            .await
            .unwrap();
        assert!(report.refreshed.is_empty());

        let program = course.get_program(&pid).await.unwrap().unwrap();
        assert!(program.module(&mid).is_some());
        assert_eq!(course.list_programs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn adding_a_video_lowers_existing_progress() {
        let (course, progress) = services();
        let pid = course
            .create_program(NewProgram {
                id: Some(ProgramId::new("p")),
                name: "Program".into(),
                description: None,
            })
            .await
            .unwrap();
        let a = ModuleId::new("A");
        course.add_module(&pid, named_module("A", 0)).await.unwrap();
        course.add_video(&pid, &a, named_video("v1")).await.unwrap();

        let user = UserId::new("u");
        let record = progress
            .toggle_video(&user, &pid, &a, &VideoId::new("v1"))
            .await
            .unwrap();
        assert_eq!(record.program_progress(), 100);

        let (_, report) = course.add_video(&pid, &a, named_video("v2")).await.unwrap();
        assert_eq!(report.refreshed, vec![user.clone()]);
        assert!(report.is_clean());

        let stored = progress.get_progress(&user, &pid).await.unwrap().unwrap();
        assert_eq!(stored.program_progress(), 50);
    }

    #[tokio::test]
    async fn deleting_a_module_drops_its_completions() {
        let (course, progress) = services();
        let pid = course
            .create_program(NewProgram {
                id: Some(ProgramId::new("p")),
                name: "Program".into(),
                description: None,
            })
            .await
            .unwrap();
        let a = ModuleId::new("A");
        let b = ModuleId::new("B");
        course.add_module(&pid, named_module("A", 0)).await.unwrap();
        course.add_module(&pid, named_module("B", 1)).await.unwrap();
        course.add_video(&pid, &a, named_video("v1")).await.unwrap();
        course.add_video(&pid, &b, named_video("v2")).await.unwrap();

        let user = UserId::new("u");
        progress
            .toggle_video(&user, &pid, &b, &VideoId::new("v2"))
            .await
            .unwrap();

        course.delete_module(&pid, &b).await.unwrap();
        let stored = progress.get_progress(&user, &pid).await.unwrap().unwrap();
        assert!(stored.completed_videos().is_empty());
        assert!(!stored.module_progress().contains_key(&b));
        assert_eq!(stored.program_progress(), 0);
    }

    #[tokio::test]
    async fn deleting_missing_video_is_not_found() {
        let (course, _) = services();
        let pid = course
            .create_program(NewProgram {
                id: Some(ProgramId::new("p")),
                name: "Program".into(),
                description: None,
            })
            .await
            .unwrap();
        course.add_module(&pid, named_module("A", 0)).await.unwrap();

        let err = course
            .delete_video(&pid, &ModuleId::new("A"), &VideoId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CourseServiceError::Storage(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn content_change_survives_a_failed_user_lookup() {
        let repo = InMemoryRepository::new();
        let progress = Arc::new(ProgressService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(UnlistedProgress(repo.clone())),
        ));
        let course = CourseService::new(fixed_clock(), Arc::new(repo), progress);
        let pid = course
            .create_program(NewProgram {
                id: Some(ProgramId::new("p")),
                name: "Program".into(),
                description: None,
            })
            .await
            .unwrap();

        let (mid, report) = course.add_module(&pid, named_module("A", 0)).await.unwrap();
        assert!(!report.is_clean());
        assert!(report.refreshed.is_empty());
        assert!(
            report
                .lookup_error
                .as_deref()
                .is_some_and(|e| e.contains("profile store offline"))
        );

        let program = course.get_program(&pid).await.unwrap().unwrap();
        assert!(program.module(&mid).is_some());

        let report = course.delete_module(&pid, &mid).await.unwrap();
        assert!(report.lookup_error.is_some());
        let program = course.get_program(&pid).await.unwrap().unwrap();
        assert!(program.module(&mid).is_none());
    }
}
