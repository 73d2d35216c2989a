//! Handlers for the `/api/v1/backup*` surface (C11).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::dto::CleanBackupsQuery;
use crate::backup::{BackupFile, RestoreOutcome};
use crate::error::AppResult;
use crate::orchestrator::Orchestrator;

pub async fn list_backups(State(orchestrator): State<Arc<Orchestrator>>) -> AppResult<Json<Vec<BackupFile>>> {
    Ok(Json(orchestrator.backup.list_backups()?))
}

pub async fn create_backup(State(orchestrator): State<Arc<Orchestrator>>) -> AppResult<(StatusCode, Json<BackupFile>)> {
    let created = orchestrator.backup.create_backup(&orchestrator.store)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /api/v1/backup/full` — identical to [`create_backup`] today; kept as
/// a distinct route because spec.md names it separately from the plain
/// create endpoint, leaving room for a future "full" variant that also
/// archives the downloads directory.
pub async fn create_full_backup(State(orchestrator): State<Arc<Orchestrator>>) -> AppResult<(StatusCode, Json<BackupFile>)> {
    create_backup(State(orchestrator)).await
}

pub async fn download_backup(State(orchestrator): State<Arc<Orchestrator>>, Path(file_name): Path<String>) -> AppResult<Response> {
    let bytes = orchestrator.backup.read_backup(&file_name)?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
    ];

    Ok((headers, bytes).into_response())
}

pub async fn delete_backup(State(orchestrator): State<Arc<Orchestrator>>, Path(file_name): Path<String>) -> AppResult<StatusCode> {
    orchestrator.backup.delete_backup(&file_name)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clean_backups(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<CleanBackupsQuery>,
) -> AppResult<Json<crate::api::dto::BulkDeleteResponse>> {
    let keep = query.keep.unwrap_or(5);
    let deleted_count = orchestrator.backup.clean_old_backups(keep)?;
    Ok(Json(crate::api::dto::BulkDeleteResponse { deleted_count }))
}

pub async fn restore_backup(State(orchestrator): State<Arc<Orchestrator>>, Path(file_name): Path<String>) -> AppResult<Json<RestoreOutcome>> {
    let outcome = orchestrator.backup.restore_backup(&file_name, &orchestrator.store).await?;
    Ok(Json(outcome))
}
