//! Row types for the Queue Store (C6), grounded in the teacher's
//! `src/backend/database.rs` row-struct style (`MangaHistory`,
//! `MangaReadingHistoryRetrieve`) and `src/backend/history.rs`.

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumString};

/// spec.md §3 `DownloadStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// spec.md §3 `DownloadEntry`, one row of the `downloads` table.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEntry {
    pub id: String,
    pub source_url: String,
    pub source_type: String,
    pub title: String,
    pub author: Option<String>,
    pub status: DownloadStatus,
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

/// Fields a caller supplies when enqueueing a new download (spec.md §4.6
/// `enqueue`); the rest default inside the store.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub id: String,
    pub source_url: String,
    pub source_type: String,
    pub title: String,
    pub author: Option<String>,
    pub plugin_id: String,
    pub created_by: String,
    pub priority: i64,
    pub total_chapters: Option<u32>,
    pub max_retries: u32,
}

/// spec.md §3 `ChapterUrlRecord`, one row of `chapter_url_records` — the
/// durable "already downloaded" ledger the Chapter Checker diffs against.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterUrlRecord {
    pub id: String,
    pub manga_id: String,
    pub url: String,
    pub chapter_number: Option<f64>,
    pub volume: Option<u32>,
    pub title: String,
    pub lang: String,
    pub downloaded_at: DateTime<Utc>,
    pub source: String,
    pub upstream_chapter_id: Option<String>,
    pub scanlation_group: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChapterUrlRecord {
    pub manga_id: String,
    pub url: String,
    pub chapter_number: Option<f64>,
    pub volume: Option<u32>,
    pub title: String,
    pub lang: String,
    pub source: String,
    pub upstream_chapter_id: Option<String>,
    pub scanlation_group: Option<String>,
}

/// Singleton row of `follow_config` (spec.md §3 `FollowConfig`).
#[derive(Debug, Clone, PartialEq)]
pub struct FollowConfig {
    pub enabled: bool,
    pub check_interval_hours: u32,
    pub urls: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_hours: 24,
            urls: None,
            last_check_time: None,
        }
    }
}

/// One row of `plugin_config` — opaque per-plugin key/value settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfigEntry {
    pub plugin_id: String,
    pub key: String,
    pub value: String,
}

/// One row of `plugin_log` — side-channel diagnostic log independent of the
/// process-wide `log` crate sink (spec.md §7).
#[derive(Debug, Clone, PartialEq)]
pub struct PluginLogEntry {
    pub id: i64,
    pub plugin_id: String,
    pub level: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPluginLogEntry {
    pub plugin_id: String,
    pub level: String,
    pub message: String,
    pub stack_trace: Option<String>,
}
