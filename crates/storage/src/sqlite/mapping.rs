use std::collections::BTreeMap;

use course_core::model::{Module, ModuleId, ProgramStatus, Video, VideoId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// Maps unique-constraint violations to `Conflict`, everything else to
/// `Connection`.
pub(crate) fn write_err(e: sqlx::Error) -> StorageError {
    let unique = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique { StorageError::Conflict } else { conn(e) }
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_i32(field: &'static str, v: i64) -> Result<i32, StorageError> {
    i32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn checklist_to_json(items: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(items).map_err(ser)
}

pub(crate) fn module_progress_to_json(
    progress: &BTreeMap<ModuleId, u8>,
) -> Result<String, StorageError> {
    serde_json::to_string(progress).map_err(ser)
}

pub(crate) fn module_progress_from_json(raw: &str) -> Result<BTreeMap<ModuleId, u8>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn parse_status(raw: &str) -> Result<ProgramStatus, StorageError> {
    raw.parse().map_err(ser)
}

pub(crate) fn progress_from_i64(v: i64) -> Result<u8, StorageError> {
    u8::try_from(v)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| StorageError::Serialization(format!("progress out of range: {v}")))
}

pub(crate) fn map_module_row(row: &SqliteRow) -> Result<Module, StorageError> {
    Module::new(
        ModuleId::new(row.try_get::<String, _>("id").map_err(ser)?),
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<Option<String>, _>("description").map_err(ser)?,
        i64_to_i32("display_order", row.try_get("display_order").map_err(ser)?)?,
        i64_to_u64("position", row.try_get("position").map_err(ser)?)?,
    )
    .map_err(ser)
}

/// Returns the owning module id alongside the mapped video.
pub(crate) fn map_video_row(row: &SqliteRow) -> Result<(ModuleId, Video), StorageError> {
    let checklist_raw: String = row.try_get("checklist").map_err(ser)?;
    let checklist: Vec<String> = serde_json::from_str(&checklist_raw).map_err(ser)?;
    let duration = row.try_get::<i64, _>("duration_secs").map_err(ser)?;

    let video = Video::new(
        VideoId::new(row.try_get::<String, _>("id").map_err(ser)?),
        row.try_get::<String, _>("title").map_err(ser)?,
        u32::try_from(duration)
            .map_err(|_| StorageError::Serialization("duration_secs overflow".into()))?,
        i64_to_i32("display_order", row.try_get("display_order").map_err(ser)?)?,
        i64_to_u64("position", row.try_get("position").map_err(ser)?)?,
        row.try_get::<Option<String>, _>("document").map_err(ser)?,
        checklist,
    )
    .map_err(ser)?;

    let module_id = ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?);
    Ok((module_id, video))
}
