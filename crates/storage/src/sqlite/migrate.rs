use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the course/progress schema.
///
/// Version 1 creates the content tables (programs, modules, videos) and the
/// per-user progress tables.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        tracing::debug!(version = 1, "applying schema migration");
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS programs (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // `position` is the insertion sequence used to break display-order ties.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS modules (
                    position INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL,
                    program_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    display_order INTEGER NOT NULL,
                    UNIQUE (program_id, id),
                    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS videos (
                    position INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL,
                    program_id TEXT NOT NULL,
                    module_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    duration_secs INTEGER NOT NULL CHECK (duration_secs >= 0),
                    display_order INTEGER NOT NULL,
                    document TEXT,
                    checklist TEXT NOT NULL,
                    UNIQUE (program_id, module_id, id),
                    FOREIGN KEY (program_id, module_id)
                        REFERENCES modules(program_id, id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_progress (
                    user_id TEXT NOT NULL,
                    program_id TEXT NOT NULL,
                    module_progress TEXT NOT NULL,
                    program_progress INTEGER NOT NULL CHECK (program_progress BETWEEN 0 AND 100),
                    program_status TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, program_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        // No foreign keys: completion ids may outlive the videos they point at
        // until the next recompute prunes them.
        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS completed_videos (
                    user_id TEXT NOT NULL,
                    program_id TEXT NOT NULL,
                    module_id TEXT NOT NULL,
                    video_id TEXT NOT NULL,
                    PRIMARY KEY (user_id, program_id, module_id, video_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_videos_program_module
                    ON videos (program_id, module_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_user_progress_program
                    ON user_progress (program_id, user_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
