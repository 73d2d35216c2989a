//! Handlers for the `/api/v1/downloads*` surface: queue CRUD, bulk clear,
//! per-library follow-list management, and scheduler settings.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::dto::{
    ClearByStatusResponse, CreateDownloadRequest, DownloadAction, DownloadActionRequest, DownloadDto, FollowTxtResponse,
    FollowTxtUpdateRequest, SchedulerSettingsDto,
};
use crate::catalog::extract_manga_id;
use crate::error::{AppError, AppResult};
use crate::orchestrator::Orchestrator;
use crate::store::models::{DownloadStatus, FollowConfig, NewDownload};

fn derive_source_type(source_url: &str) -> &'static str {
    if extract_manga_id(source_url).is_some() {
        "remote-catalog"
    } else {
        "generic-web"
    }
}

/// Falls back to the last non-empty URL path segment when the caller doesn't
/// supply a title; the real title is resolved later from catalog/extractor
/// metadata once the executor dispatches the entry.
fn derive_title(source_url: &str, supplied: Option<String>) -> String {
    supplied.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| {
        source_url
            .trim_end_matches('/')
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("untitled")
            .to_string()
    })
}

pub async fn list_downloads(State(orchestrator): State<Arc<Orchestrator>>) -> AppResult<Json<Vec<DownloadDto>>> {
    let entries = orchestrator.store.list_all_descending()?;
    Ok(Json(entries.into_iter().map(DownloadDto::from).collect()))
}

pub async fn get_download(State(orchestrator): State<Arc<Orchestrator>>, Path(id): Path<String>) -> AppResult<Json<DownloadDto>> {
    let entry = orchestrator
        .store
        .find_by_id(&id)?
        .ok_or_else(|| AppError::NotFound(format!("no such download: {id}")))?;
    Ok(Json(entry.into()))
}

pub async fn create_download(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<CreateDownloadRequest>,
) -> AppResult<(StatusCode, Json<DownloadDto>)> {
    if body.source_url.trim().is_empty() {
        return Err(AppError::BadRequest("sourceUrl must not be empty".to_string()));
    }

    let new_download = NewDownload {
        id: uuid::Uuid::new_v4().to_string(),
        source_url: body.source_url.clone(),
        source_type: derive_source_type(&body.source_url).to_string(),
        title: derive_title(&body.source_url, body.title),
        author: None,
        plugin_id: "mangadex".to_string(),
        created_by: "api".to_string(),
        priority: body.priority,
        total_chapters: None,
        max_retries: 3,
    };

    let entry = orchestrator.store.enqueue(new_download)?;
    if let Some(library_id) = body.library_id {
        orchestrator.store.set_library_path(&entry.id, &library_id)?;
    }

    let entry = orchestrator
        .store
        .find_by_id(&entry.id)?
        .ok_or_else(|| AppError::internal("download vanished immediately after enqueue"))?;

    Ok((StatusCode::CREATED, Json(entry.into())))
}

pub async fn download_action(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
    Json(body): Json<DownloadActionRequest>,
) -> AppResult<StatusCode> {
    match body.action {
        DownloadAction::Cancel => orchestrator.executor.cancel(&id)?,
        DownloadAction::Retry => orchestrator.executor.retry(&id)?,
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_download(State(orchestrator): State<Arc<Orchestrator>>, Path(id): Path<String>) -> AppResult<StatusCode> {
    orchestrator.executor.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_by_status(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(status): Path<String>,
) -> AppResult<Json<ClearByStatusResponse>> {
    let parsed: DownloadStatus = status
        .to_uppercase()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown status: {status}")))?;

    let deleted_count = orchestrator.store.delete_by_status(parsed)?;

    Ok(Json(ClearByStatusResponse {
        deleted_count,
        status,
        message: format!("cleared {deleted_count} entries"),
    }))
}

fn follow_txt_path(orchestrator: &Orchestrator, library_id: &str) -> std::path::PathBuf {
    let _ = library_id;
    orchestrator.library_root().join("follow.txt")
}

const FOLLOW_TXT_HEADER: &str = "# One manga URL per line. Lines starting with # are comments.\n# Edited URLs take effect on the next scheduled or on-demand check.\n";

pub async fn get_follow_txt(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(library_id): Path<String>,
) -> AppResult<Json<FollowTxtResponse>> {
    let path = follow_txt_path(&orchestrator, &library_id);
    let content = std::fs::read_to_string(&path).unwrap_or_default();

    Ok(Json(FollowTxtResponse {
        library_id: library_id.clone(),
        library_name: library_id,
        content,
    }))
}

pub async fn put_follow_txt(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(library_id): Path<String>,
    Json(body): Json<FollowTxtUpdateRequest>,
) -> AppResult<StatusCode> {
    let path = follow_txt_path(&orchestrator, &library_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(AppError::internal)?;
    }

    let mut content = body.content;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    let full = if content.starts_with('#') { content } else { format!("{FOLLOW_TXT_HEADER}{content}") };

    std::fs::write(&path, full).map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn check_now(State(orchestrator): State<Arc<Orchestrator>>, Path(_library_id): Path<String>) -> StatusCode {
    orchestrator.scheduler.run_library_check_now().await;
    StatusCode::NO_CONTENT
}

pub async fn get_scheduler_settings(State(orchestrator): State<Arc<Orchestrator>>) -> AppResult<Json<SchedulerSettingsDto>> {
    let config = orchestrator.store.get_follow_config()?;
    Ok(Json(SchedulerSettingsDto {
        enabled: config.enabled,
        interval_hours: config.check_interval_hours,
    }))
}

pub async fn post_scheduler_settings(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<SchedulerSettingsDto>,
) -> AppResult<Json<SchedulerSettingsDto>> {
    let mut config = orchestrator.store.get_follow_config()?;
    config.enabled = body.enabled;
    config.check_interval_hours = body.interval_hours.max(1);
    orchestrator.store.save_follow_config(&config)?;

    Ok(Json(SchedulerSettingsDto {
        enabled: config.enabled,
        interval_hours: config.check_interval_hours,
    }))
}

#[allow(dead_code)]
fn default_follow_config() -> FollowConfig {
    FollowConfig::default()
}
