use async_trait::async_trait;
use course_core::model::{ModuleId, ModuleTree, Program, ProgramId, VideoId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{checklist_to_json, conn, map_module_row, map_video_row, ser, write_err};
use crate::repository::{ContentRepository, NewModuleRecord, NewVideoRecord, StorageError};

fn program_from_row(row: &SqliteRow) -> Result<Program, StorageError> {
    Program::new(
        ProgramId::new(row.try_get::<String, _>("id").map_err(ser)?),
        row.try_get::<String, _>("name").map_err(ser)?,
        row.try_get::<Option<String>, _>("description").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

async fn program_exists(db: &mut SqliteConnection, id: &ProgramId) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 FROM programs WHERE id = ?1")
        .bind(id.as_str())
        .fetch_optional(&mut *db)
        .await
        .map_err(conn)?;
    Ok(row.is_some())
}

async fn module_exists(
    db: &mut SqliteConnection,
    program_id: &ProgramId,
    module_id: &ModuleId,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 FROM modules WHERE program_id = ?1 AND id = ?2")
        .bind(program_id.as_str())
        .bind(module_id.as_str())
        .fetch_optional(&mut *db)
        .await
        .map_err(conn)?;
    Ok(row.is_some())
}

/// Attach modules and videos to a bare program row. Callers hold a
/// transaction so both queries see one version of the program.
async fn load_children(db: &mut SqliteConnection, program: &mut Program) -> Result<(), StorageError> {
    let module_rows = sqlx::query(
        r"
        SELECT position, id, title, description, display_order
        FROM modules
        WHERE program_id = ?1
        ORDER BY position ASC
        ",
    )
    .bind(program.id().as_str())
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    for row in &module_rows {
        program.insert_module(map_module_row(row)?);
    }

    let video_rows = sqlx::query(
        r"
        SELECT position, id, module_id, title, duration_secs, display_order, document, checklist
        FROM videos
        WHERE program_id = ?1
        ORDER BY position ASC
        ",
    )
    .bind(program.id().as_str())
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    for row in &video_rows {
        let (module_id, video) = map_video_row(row)?;
        program.insert_video(&module_id, video).map_err(ser)?;
    }
    Ok(())
}

#[async_trait]
impl ContentRepository for SqliteRepository {
    async fn insert_program(&self, program: &Program) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO programs (id, name, description, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(program.id().as_str())
        .bind(program.name())
        .bind(program.description())
        .bind(program.created_at())
        .execute(&self.pool)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn get_program(&self, id: &ProgramId) -> Result<Option<Program>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let row = sqlx::query(
            r"
            SELECT id, name, description, created_at
            FROM programs WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut program = program_from_row(&row)?;
        load_children(&mut tx, &mut program).await?;
        tx.commit().await.map_err(conn)?;
        Ok(Some(program))
    }

    async fn list_programs(&self, limit: u32) -> Result<Vec<Program>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let rows = sqlx::query(
            r"
            SELECT id, name, description, created_at
            FROM programs
            ORDER BY created_at ASC, id ASC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let mut programs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut program = program_from_row(row)?;
            load_children(&mut tx, &mut program).await?;
            programs.push(program);
        }
        tx.commit().await.map_err(conn)?;
        Ok(programs)
    }

    async fn insert_module(
        &self,
        program_id: &ProgramId,
        module: NewModuleRecord,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        if !program_exists(&mut tx, program_id).await? {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
            INSERT INTO modules (id, program_id, title, description, display_order)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(module.id.as_str())
        .bind(program_id.as_str())
        .bind(module.title)
        .bind(module.description)
        .bind(i64::from(module.display_order))
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn insert_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video: NewVideoRecord,
    ) -> Result<(), StorageError> {
        let checklist = checklist_to_json(&video.checklist)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;
        if !module_exists(&mut tx, program_id, module_id).await? {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
            INSERT INTO videos (id, program_id, module_id, title, duration_secs, display_order, document, checklist)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(video.id.as_str())
        .bind(program_id.as_str())
        .bind(module_id.as_str())
        .bind(video.title)
        .bind(i64::from(video.duration_secs))
        .bind(i64::from(video.display_order))
        .bind(video.document)
        .bind(checklist)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn delete_module(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM modules WHERE program_id = ?1 AND id = ?2")
            .bind(program_id.as_str())
            .bind(module_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_video(
        &self,
        program_id: &ProgramId,
        module_id: &ModuleId,
        video_id: &VideoId,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            "DELETE FROM videos WHERE program_id = ?1 AND module_id = ?2 AND id = ?3",
        )
        .bind(program_id.as_str())
        .bind(module_id.as_str())
        .bind(video_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_program_module_tree(
        &self,
        program_id: &ProgramId,
    ) -> Result<ModuleTree, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        if !program_exists(&mut tx, program_id).await? {
            return Err(StorageError::NotFound);
        }

        let mut tree = ModuleTree::new();

        let modules = sqlx::query("SELECT id FROM modules WHERE program_id = ?1")
            .bind(program_id.as_str())
            .fetch_all(&mut *tx)
            .await
            .map_err(conn)?;
        for row in &modules {
            tree.insert_module(ModuleId::new(row.try_get::<String, _>("id").map_err(ser)?));
        }

        let videos = sqlx::query("SELECT module_id, id FROM videos WHERE program_id = ?1")
            .bind(program_id.as_str())
            .fetch_all(&mut *tx)
            .await
            .map_err(conn)?;
        for row in &videos {
            tree.insert_video(
                ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?),
                VideoId::new(row.try_get::<String, _>("id").map_err(ser)?),
            );
        }
        tx.commit().await.map_err(conn)?;

        Ok(tree)
    }
}
