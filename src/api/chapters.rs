//! Handlers for chapter-URL ledger lookups and the bulk-delete maintenance
//! endpoints (by series, by id, by date range, and all-with-confirmation).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::dto::{
    BulkDeleteResponse, CheckUrlQuery, CheckUrlResponse, CheckUrlsResponse, ConfirmQuery, DateRangeQuery, NewChaptersQuery,
    NewChaptersResponse,
};
use crate::catalog::extract_manga_id;
use crate::error::{AppError, AppResult};
use crate::orchestrator::Orchestrator;

pub async fn check_url(State(orchestrator): State<Arc<Orchestrator>>, Query(query): Query<CheckUrlQuery>) -> AppResult<Json<CheckUrlResponse>> {
    let existing = orchestrator.store.exists_by_urls(std::slice::from_ref(&query.url))?;
    Ok(Json(CheckUrlResponse {
        downloaded: existing.contains(&query.url),
        url: query.url,
    }))
}

pub async fn check_urls(State(orchestrator): State<Arc<Orchestrator>>, Json(urls): Json<Vec<String>>) -> AppResult<Json<CheckUrlsResponse>> {
    let existing = orchestrator.store.exists_by_urls(&urls)?;
    let results = urls.into_iter().map(|url| (existing.contains(&url), url)).map(|(downloaded, url)| (url, downloaded)).collect();
    Ok(Json(CheckUrlsResponse { results }))
}

pub async fn new_chapters_for_series(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(series_id): Path<String>,
    Query(query): Query<NewChaptersQuery>,
) -> AppResult<Json<NewChaptersResponse>> {
    let manga_id = extract_manga_id(&query.manga_url).ok_or_else(|| AppError::BadRequest("mangaUrl is not a catalog URL".to_string()))?;
    let manga_id = manga_id.to_string();

    let api_count = orchestrator
        .catalog
        .count_translated_chapters(&manga_id, &query.lang)
        .await
        .map_err(AppError::internal)?;
    let known_count = orchestrator.store.count_chapter_urls_by_manga_id(&manga_id)?;
    let new_chapters_estimate = api_count.saturating_sub(known_count);

    Ok(Json(NewChaptersResponse {
        series_id,
        api_count,
        known_count,
        new_chapters_estimate,
        needs_download: new_chapters_estimate > 0,
    }))
}

pub async fn delete_by_series(State(orchestrator): State<Arc<Orchestrator>>, Path(series_id): Path<String>) -> AppResult<Json<BulkDeleteResponse>> {
    let deleted_count = orchestrator.store.delete_chapter_urls_by_manga_id(&series_id)?;
    Ok(Json(BulkDeleteResponse { deleted_count }))
}

pub async fn delete_by_record_id(State(orchestrator): State<Arc<Orchestrator>>, Path(record_id): Path<String>) -> AppResult<StatusCode> {
    orchestrator.store.delete_chapter_url_by_id(&record_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_by_date_range(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<BulkDeleteResponse>> {
    let deleted_count = orchestrator.store.delete_chapter_urls_by_date_range(query.from, query.to)?;
    Ok(Json(BulkDeleteResponse { deleted_count }))
}

/// Requires `?confirm=true` — refuses otherwise so a stray client retry or
/// bookmark can't silently wipe the whole ledger.
pub async fn delete_all(State(orchestrator): State<Arc<Orchestrator>>, Query(query): Query<ConfirmQuery>) -> AppResult<Json<BulkDeleteResponse>> {
    if !query.confirm {
        return Err(AppError::BadRequest("pass ?confirm=true to delete the entire chapter-url ledger".to_string()));
    }
    let deleted_count = orchestrator.store.delete_all_chapter_urls()?;
    Ok(Json(BulkDeleteResponse { deleted_count }))
}
