//! Queue Store (C6): the durable SQLite-backed state for downloads, the
//! chapter-url ledger, follow config, and plugin config/log tables.
//!
//! Grounded in the teacher's `src/backend/database.rs` (`Lazy<Mutex<...>>`
//! connection idiom, row-struct-per-query style) and `src/backend/migration.rs`
//! (schema bootstrap via [`migration`]). Unlike the teacher's process-wide
//! global, this is an owned instance so tests can open independent in-memory
//! databases.

pub mod migration;
pub mod models;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use self::models::{
    ChapterUrlRecord, DownloadEntry, DownloadStatus, FollowConfig, NewChapterUrlRecord, NewDownload, NewPluginLogEntry,
    PluginConfigEntry, PluginLogEntry,
};

pub struct QueueStore {
    conn: Mutex<Connection>,
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Fall back for rows whose timestamp came from sqlite's own
    // `datetime('now')` default rather than an explicit insert.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "timestamp".into(), rusqlite::types::Type::Text))
}

fn parse_opt_dt(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| parse_dt(&raw)).transpose()
}

fn row_to_download(row: &rusqlite::Row) -> rusqlite::Result<DownloadEntry> {
    let status: String = row.get("status")?;
    let status = status
        .parse::<DownloadStatus>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, "status".into(), rusqlite::types::Type::Text))?;

    Ok(DownloadEntry {
        id: row.get("id")?,
        source_url: row.get("source_url")?,
        source_type: row.get("source_type")?,
        title: row.get("title")?,
        author: row.get("author")?,
        status,
        progress_percent: row.get("progress_percent")?,
        current_chapter: row.get("current_chapter")?,
        total_chapters: row.get("total_chapters")?,
        library_path: row.get("library_path")?,
        destination_path: row.get("destination_path")?,
        error_message: row.get("error_message")?,
        plugin_id: row.get("plugin_id")?,
        created_by: row.get("created_by")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        started_at: parse_opt_dt(row.get("started_at")?)?,
        completed_at: parse_opt_dt(row.get("completed_at")?)?,
        last_modified: parse_dt(&row.get::<_, String>("last_modified")?)?,
        priority: row.get("priority")?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
    })
}

fn row_to_chapter_url_record(row: &rusqlite::Row) -> rusqlite::Result<ChapterUrlRecord> {
    Ok(ChapterUrlRecord {
        id: row.get("id")?,
        manga_id: row.get("manga_id")?,
        url: row.get("url")?,
        chapter_number: row.get("chapter_number")?,
        volume: row.get("volume")?,
        title: row.get("title")?,
        lang: row.get("lang")?,
        downloaded_at: parse_dt(&row.get::<_, String>("downloaded_at")?)?,
        source: row.get("source")?,
        upstream_chapter_id: row.get("upstream_chapter_id")?,
        scanlation_group: row.get("scanlation_group")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        last_modified: parse_dt(&row.get::<_, String>("last_modified")?)?,
    })
}

impl QueueStore {
    /// Opens (creating if absent) the sqlite file at `path` and brings the
    /// schema up to date.
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate_initial_schema(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate_initial_schema(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Runs a `WAL` checkpoint, used before C11 backup snapshots a live db file.
    pub fn checkpoint(&self) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
    }

    pub fn enqueue(&self, new: NewDownload) -> rusqlite::Result<DownloadEntry> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let now = to_rfc3339(Utc::now());

        conn.execute(
            "INSERT INTO downloads(
                id, source_url, source_type, title, author, status, progress_percent,
                current_chapter, total_chapters, plugin_id, created_by, created_at,
                last_modified, priority, retry_count, max_retries
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?8, ?9, ?10, ?10, ?11, 0, ?12)",
            params![
                new.id,
                new.source_url,
                new.source_type,
                new.title,
                new.author,
                DownloadStatus::Pending.to_string(),
                new.total_chapters,
                new.plugin_id,
                new.created_by,
                now,
                new.priority,
                new.max_retries,
            ],
        )?;

        self.find_by_id_locked(&conn, &new.id)?.ok_or_else(|| {
            rusqlite::Error::QueryReturnedNoRows
        })
    }

    fn find_by_id_locked(&self, conn: &Connection, id: &str) -> rusqlite::Result<Option<DownloadEntry>> {
        conn.query_row("SELECT * FROM downloads WHERE id = ?1", params![id], row_to_download).optional()
    }

    pub fn find_by_id(&self, id: &str) -> rusqlite::Result<Option<DownloadEntry>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        self.find_by_id_locked(&conn, id)
    }

    /// Pending downloads, lowest `priority` value (highest priority) first,
    /// ties broken by insertion order. Used by the Scheduler to pick the next
    /// item to dispatch.
    pub fn find_pending_ordered(&self) -> rusqlite::Result<Vec<DownloadEntry>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM downloads WHERE status = ?1 ORDER BY priority ASC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![DownloadStatus::Pending.to_string()], row_to_download)?;
        rows.collect()
    }

    /// All downloads, highest `priority` value first, ties broken by
    /// ascending `createdDate` — the REST listing order, intentionally
    /// asymmetric with [`Self::find_pending_ordered`] (spec.md §9).
    pub fn list_all_descending(&self) -> rusqlite::Result<Vec<DownloadEntry>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM downloads ORDER BY priority DESC, created_at ASC")?;
        let rows = stmt.query_map([], row_to_download)?;
        rows.collect()
    }

    pub fn exists_by_source_url_and_status_in(&self, source_url: &str, statuses: &[DownloadStatus]) -> rusqlite::Result<bool> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!("SELECT EXISTS(SELECT 1 FROM downloads WHERE source_url = ? AND status IN ({placeholders}))");

        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(1 + statuses.len());
        values.push(&source_url);
        let status_strings: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        for status in &status_strings {
            values.push(status);
        }

        conn.query_row(&query, params_from_iter(values.iter().map(|v| *v)), |row| row.get(0))
    }

    pub fn update_status(&self, id: &str, status: DownloadStatus, error_message: Option<&str>) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let now = to_rfc3339(Utc::now());

        let started_at_clause = if status == DownloadStatus::Downloading {
            ", started_at = COALESCE(started_at, ?4)"
        } else {
            ""
        };
        let completed_at_clause = if matches!(status, DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled) {
            ", completed_at = ?4"
        } else {
            ""
        };

        let query = format!(
            "UPDATE downloads SET status = ?1, error_message = ?2, last_modified = ?3{started_at_clause}{completed_at_clause} WHERE id = ?5"
        );

        conn.execute(&query, params![status.to_string(), error_message, now, now, id])?;
        Ok(())
    }

    pub fn update_progress(&self, id: &str, progress_percent: u32, current_chapter: u32) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "UPDATE downloads SET progress_percent = ?1, current_chapter = ?2, last_modified = ?3 WHERE id = ?4",
            params![progress_percent, current_chapter, to_rfc3339(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Records the caller-supplied library handle at enqueue time, distinct
    /// from [`Self::set_destination`] which the executor calls once the
    /// actual on-disk destination is resolved.
    pub fn set_library_path(&self, id: &str, library_path: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "UPDATE downloads SET library_path = ?1, last_modified = ?2 WHERE id = ?3",
            params![library_path, to_rfc3339(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_destination(&self, id: &str, library_path: &str, destination_path: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "UPDATE downloads SET library_path = ?1, destination_path = ?2, last_modified = ?3 WHERE id = ?4",
            params![library_path, destination_path, to_rfc3339(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Increments `retry_count`, called by the Download Executor at dispatch
    /// time (spec.md §9) immediately before the PENDING -> DOWNLOADING
    /// transition, not by the scheduler's auto-retry tick.
    pub fn increment_retry_count(&self, id: &str) -> rusqlite::Result<u32> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "UPDATE downloads SET retry_count = retry_count + 1, last_modified = ?1 WHERE id = ?2",
            params![to_rfc3339(Utc::now()), id],
        )?;
        conn.query_row("SELECT retry_count FROM downloads WHERE id = ?1", params![id], |row| row.get(0))
    }

    /// All downloads in `status`, oldest `last_modified` first — used by the
    /// scheduler's auto-retry tick to find eligible FAILED entries.
    pub fn find_by_status(&self, status: DownloadStatus) -> rusqlite::Result<Vec<DownloadEntry>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM downloads WHERE status = ?1 ORDER BY last_modified ASC")?;
        let rows = stmt.query_map(params![status.to_string()], row_to_download)?;
        rows.collect()
    }

    pub fn delete_by_status(&self, status: DownloadStatus) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute("DELETE FROM downloads WHERE status = ?1", params![status.to_string()])
    }

    pub fn delete_by_id(&self, id: &str) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute("DELETE FROM downloads WHERE id = ?1", params![id])
    }

    // -- chapter url ledger --------------------------------------------------

    pub fn record_chapter_url(&self, new: NewChapterUrlRecord) -> rusqlite::Result<ChapterUrlRecord> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_rfc3339(Utc::now());

        conn.execute(
            "INSERT INTO chapter_url_records(
                id, manga_id, url, chapter_number, volume, title, lang, downloaded_at,
                source, upstream_chapter_id, scanlation_group, created_at, last_modified
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?8, ?8)",
            params![
                id,
                new.manga_id,
                new.url,
                new.chapter_number,
                new.volume,
                new.title,
                new.lang,
                now,
                new.source,
                new.upstream_chapter_id,
                new.scanlation_group,
            ],
        )?;

        conn.query_row("SELECT * FROM chapter_url_records WHERE id = ?1", params![id], row_to_chapter_url_record)
    }

    /// Batch membership check against the url ledger — the Chapter Checker's
    /// core "which of these upstream chapter urls have we already downloaded"
    /// diff (spec.md §4.7).
    pub fn exists_by_urls(&self, urls: &[String]) -> rusqlite::Result<std::collections::HashSet<String>> {
        if urls.is_empty() {
            return Ok(std::collections::HashSet::new());
        }

        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let placeholders = urls.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!("SELECT url FROM chapter_url_records WHERE url IN ({placeholders})");

        let mut stmt = conn.prepare(&query)?;
        let values: Vec<&dyn rusqlite::ToSql> = urls.iter().map(|u| u as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_from_iter(values.iter().map(|v| *v)), |row| row.get::<_, String>(0))?;

        rows.collect()
    }

    pub fn count_chapter_urls_by_manga_id(&self, manga_id: &str) -> rusqlite::Result<u32> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM chapter_url_records WHERE manga_id = ?1", params![manga_id], |row| row.get(0))
    }

    pub fn find_chapter_urls_by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> rusqlite::Result<Vec<ChapterUrlRecord>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM chapter_url_records WHERE downloaded_at BETWEEN ?1 AND ?2 ORDER BY downloaded_at ASC")?;
        let rows = stmt.query_map(params![to_rfc3339(from), to_rfc3339(to)], row_to_chapter_url_record)?;
        rows.collect()
    }

    pub fn delete_chapter_urls_by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "DELETE FROM chapter_url_records WHERE downloaded_at BETWEEN ?1 AND ?2",
            params![to_rfc3339(from), to_rfc3339(to)],
        )
    }

    pub fn delete_chapter_urls_by_manga_id(&self, manga_id: &str) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute("DELETE FROM chapter_url_records WHERE manga_id = ?1", params![manga_id])
    }

    pub fn delete_chapter_url_by_id(&self, id: &str) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute("DELETE FROM chapter_url_records WHERE id = ?1", params![id])
    }

    /// Wipes the entire ledger. The REST boundary gates this behind an
    /// explicit confirmation parameter; the store itself applies none.
    pub fn delete_all_chapter_urls(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute("DELETE FROM chapter_url_records", [])
    }

    // -- follow config --------------------------------------------------------

    pub fn get_follow_config(&self) -> rusqlite::Result<FollowConfig> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let row = conn
            .query_row(
                "SELECT enabled, check_interval_hours, urls, last_check_time FROM follow_config WHERE id = 1",
                [],
                |row| {
                    let enabled: bool = row.get(0)?;
                    let check_interval_hours: u32 = row.get(1)?;
                    let urls: Option<String> = row.get(2)?;
                    let last_check_time: Option<String> = row.get(3)?;
                    Ok((enabled, check_interval_hours, urls, last_check_time))
                },
            )
            .optional()?;

        match row {
            Some((enabled, check_interval_hours, urls, last_check_time)) => Ok(FollowConfig {
                enabled,
                check_interval_hours,
                urls,
                last_check_time: parse_opt_dt(last_check_time)?,
            }),
            None => Ok(FollowConfig::default()),
        }
    }

    pub fn save_follow_config(&self, config: &FollowConfig) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "INSERT INTO follow_config(id, enabled, check_interval_hours, urls, last_check_time) VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled, check_interval_hours = excluded.check_interval_hours,
                urls = excluded.urls, last_check_time = excluded.last_check_time",
            params![config.enabled, config.check_interval_hours, config.urls, config.last_check_time.map(to_rfc3339)],
        )?;
        Ok(())
    }

    // -- plugin config/log ------------------------------------------------------

    pub fn get_plugin_config(&self, plugin_id: &str, key: &str) -> rusqlite::Result<Option<String>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.query_row("SELECT value FROM plugin_config WHERE plugin_id = ?1 AND key = ?2", params![plugin_id, key], |row| row.get(0))
            .optional()
    }

    pub fn set_plugin_config(&self, entry: &PluginConfigEntry) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        conn.execute(
            "INSERT INTO plugin_config(plugin_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(plugin_id, key) DO UPDATE SET value = excluded.value",
            params![entry.plugin_id, entry.key, entry.value],
        )?;
        Ok(())
    }

    pub fn log_plugin_event(&self, entry: NewPluginLogEntry) -> rusqlite::Result<PluginLogEntry> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let now = to_rfc3339(Utc::now());

        conn.execute(
            "INSERT INTO plugin_log(plugin_id, level, message, stack_trace, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.plugin_id, entry.level, entry.message, entry.stack_trace, now],
        )?;

        let id = conn.last_insert_rowid();
        conn.query_row("SELECT id, plugin_id, level, message, stack_trace, created_at FROM plugin_log WHERE id = ?1", params![id], |row| {
            Ok(PluginLogEntry {
                id: row.get(0)?,
                plugin_id: row.get(1)?,
                level: row.get(2)?,
                message: row.get(3)?,
                stack_trace: row.get(4)?,
                created_at: parse_dt(&row.get::<_, String>(5)?)?,
            })
        })
    }

    pub fn recent_plugin_logs(&self, plugin_id: &str, limit: u32) -> rusqlite::Result<Vec<PluginLogEntry>> {
        let conn = self.conn.lock().expect("queue store mutex poisoned");
        let mut stmt = conn.prepare("SELECT id, plugin_id, level, message, stack_trace, created_at FROM plugin_log WHERE plugin_id = ?1 ORDER BY id DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![plugin_id, limit], |row| {
            Ok(PluginLogEntry {
                id: row.get(0)?,
                plugin_id: row.get(1)?,
                level: row.get(2)?,
                message: row.get(3)?,
                stack_trace: row.get(4)?,
                created_at: parse_dt(&row.get::<_, String>(5)?)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample(id: &str, priority: i64) -> NewDownload {
        NewDownload {
            id: id.to_string(),
            source_url: format!("https://mangadex.org/title/{id}"),
            source_type: "manga".to_string(),
            title: format!("Title {id}"),
            author: None,
            plugin_id: "mangadex".to_string(),
            created_by: "user".to_string(),
            priority,
            total_chapters: None,
            max_retries: 3,
        }
    }

    #[test]
    fn it_enqueues_and_finds_by_id() {
        let store = QueueStore::open_in_memory().unwrap();
        let saved = store.enqueue(sample("a", 5)).unwrap();
        assert_eq!(saved.status, DownloadStatus::Pending);

        let found = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(found.id, "a");
    }

    #[test]
    fn it_orders_pending_by_ascending_priority_and_reverses_for_listing() {
        let store = QueueStore::open_in_memory().unwrap();
        store.enqueue(sample("low-priority", 10)).unwrap();
        store.enqueue(sample("high-priority", 1)).unwrap();

        let pending = store.find_pending_ordered().unwrap();
        assert_eq!(pending[0].id, "high-priority");
        assert_eq!(pending[1].id, "low-priority");

        let listed = store.list_all_descending().unwrap();
        assert_eq!(listed[0].id, "low-priority");
        assert_eq!(listed[1].id, "high-priority");
    }

    #[test]
    fn it_tracks_status_transitions_and_timestamps() {
        let store = QueueStore::open_in_memory().unwrap();
        store.enqueue(sample("a", 5)).unwrap();

        store.update_status("a", DownloadStatus::Downloading, None).unwrap();
        let entry = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Downloading);
        assert!(entry.started_at.is_some());
        assert!(entry.completed_at.is_none());

        store.update_status("a", DownloadStatus::Failed, Some("boom")).unwrap();
        let entry = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("boom"));
        assert!(entry.completed_at.is_some());
    }

    #[test]
    fn it_increments_retry_count() {
        let store = QueueStore::open_in_memory().unwrap();
        store.enqueue(sample("a", 5)).unwrap();
        assert_eq!(store.increment_retry_count("a").unwrap(), 1);
        assert_eq!(store.increment_retry_count("a").unwrap(), 2);
    }

    #[test]
    fn it_checks_existence_by_source_url_and_status() {
        let store = QueueStore::open_in_memory().unwrap();
        store.enqueue(sample("a", 5)).unwrap();

        assert!(store
            .exists_by_source_url_and_status_in("https://mangadex.org/title/a", &[DownloadStatus::Pending, DownloadStatus::Downloading])
            .unwrap());
        assert!(!store
            .exists_by_source_url_and_status_in("https://mangadex.org/title/a", &[DownloadStatus::Completed])
            .unwrap());
    }

    #[test]
    fn it_deletes_by_status() {
        let store = QueueStore::open_in_memory().unwrap();
        store.enqueue(sample("a", 5)).unwrap();
        store.enqueue(sample("b", 6)).unwrap();
        store.update_status("b", DownloadStatus::Completed, None).unwrap();

        let deleted = store.delete_by_status(DownloadStatus::Completed).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.find_by_id("b").unwrap().is_none());
        assert!(store.find_by_id("a").unwrap().is_some());
    }

    #[test]
    fn it_records_chapter_urls_and_checks_batch_membership() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .record_chapter_url(NewChapterUrlRecord {
                manga_id: "m1".to_string(),
                url: "https://mangadex.org/chapter/c1".to_string(),
                chapter_number: Some(1.0),
                volume: Some(1),
                title: "Chapter 1".to_string(),
                lang: "en".to_string(),
                source: "mangadex".to_string(),
                upstream_chapter_id: Some("c1".to_string()),
                scanlation_group: None,
            })
            .unwrap();

        let existing = store
            .exists_by_urls(&["https://mangadex.org/chapter/c1".to_string(), "https://mangadex.org/chapter/c2".to_string()])
            .unwrap();

        assert!(existing.contains("https://mangadex.org/chapter/c1"));
        assert!(!existing.contains("https://mangadex.org/chapter/c2"));
    }

    #[test]
    fn it_round_trips_follow_config() {
        let store = QueueStore::open_in_memory().unwrap();
        assert_eq!(store.get_follow_config().unwrap(), FollowConfig::default());

        let config = FollowConfig {
            enabled: true,
            check_interval_hours: 6,
            urls: Some("[\"https://mangadex.org/title/a\"]".to_string()),
            last_check_time: Some(Utc::now()),
        };
        store.save_follow_config(&config).unwrap();

        let fetched = store.get_follow_config().unwrap();
        assert_eq!(fetched.enabled, true);
        assert_eq!(fetched.check_interval_hours, 6);
    }

    #[test]
    fn it_logs_and_lists_recent_plugin_events() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .log_plugin_event(NewPluginLogEntry {
                plugin_id: "mangadex".to_string(),
                level: "ERROR".to_string(),
                message: "boom".to_string(),
                stack_trace: None,
            })
            .unwrap();

        let logs = store.recent_plugin_logs("mangadex", 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "boom");
    }
}
