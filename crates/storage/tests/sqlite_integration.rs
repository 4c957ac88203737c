use course_core::model::{
    CompletedVideos, ModuleId, ModuleTree, Program, ProgramId, ProgramStatus, UserId,
    UserProgressRecord, VideoId,
};
use course_core::progress::recompute_progress;
use course_core::time::fixed_now;
use storage::repository::{
    ContentRepository, NewModuleRecord, NewVideoRecord, ProgressRepository, StorageError,
};
use storage::sqlite::{SqliteRepository, SqliteSettings};

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(
        &format!("sqlite:file:{name}?mode=memory&cache=shared"),
        SqliteSettings::default(),
    )
    .await
    .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn record_for(
    user: &UserId,
    pid: &ProgramId,
    tree: &ModuleTree,
    done: &CompletedVideos,
) -> UserProgressRecord {
    UserProgressRecord::from_snapshot(
        user.clone(),
        pid.clone(),
        recompute_progress(pid, tree, done),
        fixed_now(),
    )
}

fn module(id: &str, order: i32) -> NewModuleRecord {
    NewModuleRecord {
        id: ModuleId::new(id),
        title: format!("Module {id}"),
        description: Some("weekly habits".into()),
        display_order: order,
    }
}

fn video(id: &str, order: i32) -> NewVideoRecord {
    NewVideoRecord {
        id: VideoId::new(id),
        title: format!("Video {id}"),
        duration_secs: 240,
        display_order: order,
        document: None,
        checklist: vec![],
    }
}

async fn seed_program(repo: &SqliteRepository, pid: &ProgramId) {
    let program = Program::new(pid.clone(), "Metabolic Reset", None, fixed_now()).unwrap();
    repo.insert_program(&program).await.unwrap();
    repo.insert_module(pid, module("A", 0)).await.unwrap();
    repo.insert_module(pid, module("B", 1)).await.unwrap();
    for (i, v) in ["v1", "v2", "v3", "v4"].into_iter().enumerate() {
        repo.insert_video(pid, &ModuleId::new("A"), video(v, i as i32))
            .await
            .unwrap();
    }
    for v in ["v5", "v6"] {
        repo.insert_video(pid, &ModuleId::new("B"), video(v, 0))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn sqlite_program_roundtrip_keeps_order_and_checklist() {
    let repo = connect("memdb_program_roundtrip").await;
    let pid = ProgramId::new("reset");
    seed_program(&repo, &pid).await;

    let mut with_extras = video("v7", 0);
    with_extras.document = Some("docs/portion-guide.pdf".into());
    with_extras.checklist = vec!["weigh in".into(), "log water".into()];
    repo.insert_video(&pid, &ModuleId::new("B"), with_extras)
        .await
        .unwrap();

    let program = repo.get_program(&pid).await.unwrap().expect("program");
    assert_eq!(program.name(), "Metabolic Reset");
    assert_eq!(program.total_videos(), 7);

    let modules = program.modules_in_order();
    assert_eq!(modules[0].id().as_str(), "A");
    assert_eq!(modules[1].description(), Some("weekly habits"));

    let b_videos: Vec<&str> = modules[1]
        .videos_in_order()
        .into_iter()
        .map(|v| v.id().as_str())
        .collect();
    assert_eq!(b_videos, ["v5", "v6", "v7"]);

    let v7 = modules[1].video(&VideoId::new("v7")).unwrap();
    assert_eq!(v7.document(), Some("docs/portion-guide.pdf"));
    assert_eq!(v7.checklist().len(), 2);

    assert_eq!(repo.list_programs(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_delete_module_cascades_videos_in_tree() {
    let repo = connect("memdb_delete_cascade").await;
    let pid = ProgramId::new("reset");
    seed_program(&repo, &pid).await;

    repo.delete_module(&pid, &ModuleId::new("A")).await.unwrap();
    let tree = repo.get_program_module_tree(&pid).await.unwrap();
    assert_eq!(tree.module_count(), 1);
    assert_eq!(tree.total_videos(), 2);

    repo.delete_video(&pid, &ModuleId::new("B"), &VideoId::new("v5"))
        .await
        .unwrap();
    let tree = repo.get_program_module_tree(&pid).await.unwrap();
    assert_eq!(tree.total_videos(), 1);

    assert!(matches!(
        repo.delete_video(&pid, &ModuleId::new("B"), &VideoId::new("v5"))
            .await,
        Err(StorageError::NotFound)
    ));
    assert!(matches!(
        repo.get_program_module_tree(&ProgramId::new("nope")).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_duplicate_module_is_conflict() {
    let repo = connect("memdb_duplicate_module").await;
    let pid = ProgramId::new("reset");
    seed_program(&repo, &pid).await;

    assert!(matches!(
        repo.insert_module(&pid, module("A", 5)).await,
        Err(StorageError::Conflict)
    ));
    assert!(matches!(
        repo.insert_module(&ProgramId::new("nope"), module("Z", 0))
            .await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_progress_merge_replaces_completion_set() {
    let repo = connect("memdb_progress_merge").await;
    let pid = ProgramId::new("reset");
    let user = UserId::new("patient-1");
    seed_program(&repo, &pid).await;

    let tree: ModuleTree = repo.get_program_module_tree(&pid).await.unwrap();
    let done: CompletedVideos = [("A", vec!["v1", "v2"]), ("B", vec!["v5"])]
        .into_iter()
        .collect();
    let record = UserProgressRecord::from_snapshot(
        user.clone(),
        pid.clone(),
        recompute_progress(&pid, &tree, &done),
        fixed_now(),
    );
    repo.set_progress(&record).await.unwrap();

    let stored = repo.get_progress(&user, &pid).await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert_eq!(stored.program_progress(), 50);

    let all_done: CompletedVideos = [("A", vec!["v1", "v2", "v3", "v4"]), ("B", vec!["v5", "v6"])]
        .into_iter()
        .collect();
    let finished = UserProgressRecord::from_snapshot(
        user.clone(),
        pid.clone(),
        recompute_progress(&pid, &tree, &all_done),
        fixed_now(),
    );
    repo.set_progress(&finished).await.unwrap();

    let stored = repo.get_progress(&user, &pid).await.unwrap().unwrap();
    assert_eq!(stored.program_status(), ProgramStatus::Completed);
    assert_eq!(repo.get_completed_videos(&user, &pid).await.unwrap(), all_done);
    assert_eq!(
        repo.list_users_with_progress(&pid).await.unwrap(),
        vec![user.clone()]
    );
    assert!(
        repo.get_progress(&UserId::new("someone-else"), &pid)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_stored_progress_is_consistent_with_its_completion_set() {
    let repo = connect("memdb_progress_consistency").await;
    let pid = ProgramId::new("reset");
    let user = UserId::new("patient-2");
    seed_program(&repo, &pid).await;
    let tree = repo.get_program_module_tree(&pid).await.unwrap();

    let steps: Vec<CompletedVideos> = vec![
        [("A", vec!["v1"])].into_iter().collect(),
        [("A", vec!["v1", "v3"]), ("B", vec!["v6"])].into_iter().collect(),
        [("B", vec!["v5", "v6"])].into_iter().collect(),
    ];
    for done in steps {
        repo.set_progress(&record_for(&user, &pid, &tree, &done))
            .await
            .unwrap();

        let stored = repo.get_progress(&user, &pid).await.unwrap().unwrap();
        assert_eq!(stored.completed_videos(), &done);
        assert_eq!(
            stored.snapshot(),
            recompute_progress(&pid, &tree, stored.completed_videos())
        );
    }
}

#[tokio::test]
async fn sqlite_reads_never_mix_two_writes() {
    let dir = std::env::temp_dir().join(format!("course-progress-mix-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let db = dir.join("progress.sqlite3");
    let repo = SqliteRepository::connect(db.to_str().unwrap(), SqliteSettings::default())
        .await
        .unwrap();
    repo.migrate().await.unwrap();

    let pid = ProgramId::new("reset");
    let user = UserId::new("patient-3");
    seed_program(&repo, &pid).await;
    let tree = repo.get_program_module_tree(&pid).await.unwrap();

    let few: CompletedVideos = [("A", vec!["v1"])].into_iter().collect();
    let many: CompletedVideos = [("A", vec!["v1", "v2", "v3"]), ("B", vec!["v5", "v6"])]
        .into_iter()
        .collect();
    let records = [
        record_for(&user, &pid, &tree, &few),
        record_for(&user, &pid, &tree, &many),
    ];
    repo.set_progress(&records[0]).await.unwrap();

    let writer = {
        let repo = repo.clone();
        let records = records.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                repo.set_progress(&records[i % 2]).await.unwrap();
            }
        })
    };

    for _ in 0..40 {
        let stored = repo.get_progress(&user, &pid).await.unwrap().unwrap();
        assert!(records.contains(&stored), "torn read: {stored:?}");
    }
    writer.await.unwrap();

    let _ = std::fs::remove_dir_all(&dir);
}
