use async_trait::async_trait;
use course_core::model::{
    CompletedVideos, ModuleId, ProgramId, ProgressSnapshot, UserId, UserProgressRecord, VideoId,
};
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    conn, module_progress_from_json, module_progress_to_json, parse_status, progress_from_i64, ser,
};
use crate::repository::{ProgressRepository, StorageError};

async fn load_completed(
    db: &mut SqliteConnection,
    user_id: &UserId,
    program_id: &ProgramId,
) -> Result<CompletedVideos, StorageError> {
    let rows = sqlx::query(
        r"
        SELECT module_id, video_id
        FROM completed_videos
        WHERE user_id = ?1 AND program_id = ?2
        ",
    )
    .bind(user_id.as_str())
    .bind(program_id.as_str())
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    let mut pairs = Vec::with_capacity(rows.len());
    for row in &rows {
        let module_id = ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?);
        let video_id = VideoId::new(row.try_get::<String, _>("video_id").map_err(ser)?);
        pairs.push((module_id, [video_id]));
    }
    Ok(pairs.into_iter().collect())
}

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_completed_videos(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<CompletedVideos, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        load_completed(&mut db, user_id, program_id).await
    }

    async fn get_progress(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
    ) -> Result<Option<UserProgressRecord>, StorageError> {
        // Row and completion set must come from the same write.
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let row = sqlx::query(
            r"
            SELECT module_progress, program_progress, program_status, updated_at
            FROM user_progress
            WHERE user_id = ?1 AND program_id = ?2
            ",
        )
        .bind(user_id.as_str())
        .bind(program_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let completed = load_completed(&mut tx, user_id, program_id).await?;
        tx.commit().await.map_err(conn)?;

        let raw_modules: String = row.try_get("module_progress").map_err(ser)?;
        let raw_status: String = row.try_get("program_status").map_err(ser)?;
        let snapshot = ProgressSnapshot {
            module_progress: module_progress_from_json(&raw_modules)?,
            program_progress: progress_from_i64(row.try_get("program_progress").map_err(ser)?)?,
            program_status: parse_status(&raw_status)?,
            pruned_completed_videos: completed,
        };

        Ok(Some(UserProgressRecord::from_snapshot(
            user_id.clone(),
            program_id.clone(),
            snapshot,
            row.try_get("updated_at").map_err(ser)?,
        )))
    }

    async fn set_progress(&self, record: &UserProgressRecord) -> Result<(), StorageError> {
        let user_id = record.user_id().as_str();
        let program_id = record.program_id().as_str();
        let module_progress = module_progress_to_json(record.module_progress())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO user_progress (user_id, program_id, module_progress, program_progress, program_status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, program_id) DO UPDATE SET
                module_progress = excluded.module_progress,
                program_progress = excluded.program_progress,
                program_status = excluded.program_status,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id)
        .bind(program_id)
        .bind(module_progress)
        .bind(i64::from(record.program_progress()))
        .bind(record.program_status().as_str())
        .bind(record.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM completed_videos WHERE user_id = ?1 AND program_id = ?2")
            .bind(user_id)
            .bind(program_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (module_id, videos) in record.completed_videos().iter() {
            for video_id in videos {
                sqlx::query(
                    r"
                    INSERT INTO completed_videos (user_id, program_id, module_id, video_id)
                    VALUES (?1, ?2, ?3, ?4)
                    ",
                )
                .bind(user_id)
                .bind(program_id)
                .bind(module_id.as_str())
                .bind(video_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(
            user_id,
            program_id,
            program_progress = record.program_progress(),
            "progress written"
        );
        Ok(())
    }

    async fn list_users_with_progress(
        &self,
        program_id: &ProgramId,
    ) -> Result<Vec<UserId>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id FROM user_progress
            WHERE program_id = ?1
            ORDER BY user_id ASC
            ",
        )
        .bind(program_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map(UserId::new)
                    .map_err(ser)
            })
            .collect()
    }
}
