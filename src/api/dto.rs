//! REST-layer request/response shapes, kept distinct from the Queue Store's
//! row types the way the Komga-handler file's `SeriesDto`/`Content` split
//! keeps its database rows out of the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::models::DownloadEntry;

fn default_priority() -> i64 {
    5
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDto {
    pub id: String,
    pub source_url: String,
    pub source_type: String,
    pub title: String,
    pub author: Option<String>,
    pub status: String,
    pub progress_percent: u32,
    pub current_chapter: u32,
    pub total_chapters: Option<u32>,
    pub library_path: Option<String>,
    pub destination_path: Option<String>,
    pub error_message: Option<String>,
    pub plugin_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl From<DownloadEntry> for DownloadDto {
    fn from(entry: DownloadEntry) -> Self {
        Self {
            id: entry.id,
            source_url: entry.source_url,
            source_type: entry.source_type,
            title: entry.title,
            author: entry.author,
            status: entry.status.to_string(),
            progress_percent: entry.progress_percent,
            current_chapter: entry.current_chapter,
            total_chapters: entry.total_chapters,
            library_path: entry.library_path,
            destination_path: entry.destination_path,
            error_message: entry.error_message,
            plugin_id: entry.plugin_id,
            created_by: entry.created_by,
            created_at: entry.created_at,
            started_at: entry.started_at,
            completed_at: entry.completed_at,
            last_modified: entry.last_modified,
            priority: entry.priority,
            retry_count: entry.retry_count,
            max_retries: entry.max_retries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadRequest {
    pub source_url: String,
    pub library_id: Option<String>,
    pub title: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Cancel,
    Retry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadActionRequest {
    pub action: DownloadAction,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearByStatusResponse {
    pub deleted_count: usize,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowTxtResponse {
    pub library_id: String,
    pub library_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowTxtUpdateRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettingsDto {
    pub enabled: bool,
    pub interval_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckUrlQuery {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUrlResponse {
    pub url: String,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckUrlsResponse {
    pub results: std::collections::HashMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChaptersQuery {
    pub manga_url: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChaptersResponse {
    pub series_id: String,
    pub api_count: u32,
    pub known_count: u32,
    pub new_chapters_estimate: u32,
    pub needs_download: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanBackupsQuery {
    pub keep: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}
