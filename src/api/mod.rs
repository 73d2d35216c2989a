//! REST + duplex-websocket surface (spec.md §6), mounted under `/api/v1`.
//!
//! Grounded in `other_examples`' Komga-handler file's DTO/`AppError` split
//! and `mmogr-gglib`'s axum adapter crate layout (handler modules grouped by
//! resource, assembled into one `Router` at the top).

pub mod backup;
pub mod chapters;
pub mod downloads;
pub mod dto;
pub mod progress_ws;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::Orchestrator;

pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let downloads_routes = Router::new()
        .route("/", get(downloads::list_downloads).post(downloads::create_download))
        .route("/:id", get(downloads::get_download).delete(downloads::delete_download))
        .route("/:id/action", post(downloads::download_action))
        .route("/clear/:status", delete(downloads::clear_by_status))
        .route("/follow-txt/:library_id", get(downloads::get_follow_txt).put(downloads::put_follow_txt))
        .route("/follow-txt/:library_id/check-now", post(downloads::check_now))
        .route("/scheduler", get(downloads::get_scheduler_settings).post(downloads::post_scheduler_settings))
        .route("/progress", get(progress_ws::upgrade));

    let backup_routes = Router::new()
        .route("/", get(backup::list_backups).post(backup::create_backup))
        .route("/full", post(backup::create_full_backup))
        .route("/:file_name/download", get(backup::download_backup))
        .route("/:file_name", delete(backup::delete_backup))
        .route("/clean", post(backup::clean_backups))
        .route("/restore/:file_name", post(backup::restore_backup));

    let chapter_routes = Router::new()
        .route("/check-url", get(chapters::check_url))
        .route("/check-urls", post(chapters::check_urls))
        .route("/series/:series_id/new-chapters", get(chapters::new_chapters_for_series))
        .route("/chapter-urls/series/:series_id", delete(chapters::delete_by_series))
        .route("/chapter-urls/by-date-range", delete(chapters::delete_by_date_range))
        .route("/chapter-urls/:record_id", delete(chapters::delete_by_record_id))
        .route("/chapter-urls", delete(chapters::delete_all));

    Router::new()
        .nest("/api/v1/downloads", downloads_routes)
        .nest("/api/v1/backup", backup_routes)
        .nest("/api/v1", chapter_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}
