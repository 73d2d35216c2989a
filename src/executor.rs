//! Download Executor (C9): the state machine that drives one queued download
//! from PENDING through to COMPLETED/FAILED/CANCELLED, composing the
//! Catalog Client (C2), Extractor Driver (C3), CBZ Post-Processor (C4),
//! Series Materializer (C5), Queue Store (C6), and Progress Hub (C10).
//!
//! Grounded in `src/backend/download.rs`'s per-chapter progress-event
//! publishing loop (`create_manga_directory`, the `exists!`-guarded
//! directory creation, the all-chapters-then-per-page loop), generalized
//! here from an in-process page downloader to one driving an external
//! extractor subprocess per chapter.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Arc;

use crate::catalog::{extract_manga_id, CatalogClient, ChapterDescriptor, MangaMetadata};
use crate::cbz;
use crate::error::AppResult;
use crate::extractor::{generate_config_file, ExtractorDriver, ExtractorIdentity};
use crate::logger::ILogger;
use crate::progress::{ProgressEvent, ProgressEventType, ProgressHub};
use crate::scheduler::DownloadDispatcher;
use crate::series;
use crate::store::models::DownloadStatus;
use crate::store::QueueStore;

/// Process-scoped sets of in-flight and cancel-requested download ids,
/// shared with [`crate::orchestrator::Orchestrator`] so a REST `cancel` call
/// and a running dispatch loop observe the same state (spec.md §9).
#[derive(Clone, Default)]
pub struct ActiveDownloadTracker {
    active: Arc<Mutex<HashSet<String>>>,
    cancelled: Arc<Mutex<HashSet<String>>>,
}

impl ActiveDownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_active(&self, id: &str) {
        self.active.lock().expect("active set mutex poisoned").insert(id.to_string());
    }

    fn unmark_active(&self, id: &str) {
        self.active.lock().expect("active set mutex poisoned").remove(id);
        self.cancelled.lock().expect("cancelled set mutex poisoned").remove(id);
    }

    pub fn request_cancel(&self, id: &str) {
        self.cancelled.lock().expect("cancelled set mutex poisoned").insert(id.to_string());
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.cancelled.lock().expect("cancelled set mutex poisoned").contains(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().expect("active set mutex poisoned").contains(id)
    }
}

pub struct DownloadExecutor<C: CatalogClient, L: ILogger> {
    store: Arc<QueueStore>,
    catalog: Arc<C>,
    extractor: Arc<ExtractorDriver<L>>,
    hub: Arc<ProgressHub>,
    logger: Arc<L>,
    tracker: ActiveDownloadTracker,
    library_root: PathBuf,
    preferred_lang: String,
}

fn comic_info_descriptor(chapter_number: Option<f64>, title: &str) -> ChapterDescriptor {
    ChapterDescriptor {
        chapter_id: String::new(),
        chapter_url: None,
        chapter_number,
        volume: None,
        title: title.to_string(),
        language: "en".to_string(),
        pages: 0,
        scanlation_group: None,
        publish_date: None,
    }
}

/// Every `.cbz` file directly under `dir`, in filesystem iteration order.
fn list_cbz_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return vec![];
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("cbz"))
        .collect()
}

impl<C: CatalogClient + 'static, L: ILogger + Send + Sync + 'static> DownloadExecutor<C, L> {
    pub fn new(
        store: Arc<QueueStore>,
        catalog: Arc<C>,
        extractor: Arc<ExtractorDriver<L>>,
        hub: Arc<ProgressHub>,
        logger: Arc<L>,
        tracker: ActiveDownloadTracker,
        library_root: PathBuf,
        preferred_lang: String,
    ) -> Self {
        Self {
            store,
            catalog,
            extractor,
            hub,
            logger,
            tracker,
            library_root,
            preferred_lang,
        }
    }

    pub fn tracker(&self) -> &ActiveDownloadTracker {
        &self.tracker
    }

    /// `cancel(id)`: requests cancellation of a running dispatch, or
    /// immediately cancels a still-PENDING entry.
    pub fn cancel(&self, id: &str) -> AppResult<()> {
        self.tracker.request_cancel(id);

        if let Some(entry) = self.store.find_by_id(id)? {
            if entry.status == DownloadStatus::Pending {
                self.store.update_status(id, DownloadStatus::Cancelled, None)?;
            }
        }
        Ok(())
    }

    /// `retry(id)`: resets a FAILED entry back to PENDING so the scheduler
    /// picks it up again. `retry_count` is untouched here.
    pub fn retry(&self, id: &str) -> AppResult<()> {
        if let Some(entry) = self.store.find_by_id(id)? {
            if entry.status == DownloadStatus::Failed {
                self.store.update_status(id, DownloadStatus::Pending, None)?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> AppResult<()> {
        self.tracker.request_cancel(id);
        self.store.delete_by_id(id)?;
        Ok(())
    }

    async fn fail(&self, id: &str, message: impl Into<String>) {
        let message = message.into();
        if let Err(err) = self.store.update_status(id, DownloadStatus::Failed, Some(&message)) {
            self.logger.error(&err);
        }
        self.hub.publish(ProgressEvent::new(ProgressEventType::Failed).for_download(id).with_error_message(message));
        self.tracker.unmark_active(id);
    }

    fn config_path(&self, destination: &Path) -> PathBuf {
        destination.join(".extractor-config.json")
    }

    fn write_config_file(&self, destination: &Path) -> AppResult<PathBuf> {
        let identity = ExtractorIdentity {
            preferred_language: self.preferred_lang.clone(),
            username: None,
            password: None,
        };
        let config_path = self.config_path(destination);
        std::fs::create_dir_all(destination).map_err(crate::error::AppError::internal)?;
        std::fs::write(&config_path, generate_config_file(&identity)).map_err(crate::error::AppError::internal)?;
        Ok(config_path)
    }

    async fn run_per_chapter(&self, id: &str, manga: &MangaMetadata, chapters: Vec<ChapterDescriptor>, destination: &Path, config_path: &Path) -> bool {
        let total = chapters.len() as u32;

        for (index, chapter) in chapters.into_iter().enumerate() {
            if self.tracker.is_cancelled(id) {
                let _ = self.store.update_status(id, DownloadStatus::Cancelled, None);
                self.hub.publish(ProgressEvent::new(ProgressEventType::Failed).for_download(id).with_error_message("cancelled"));
                return false;
            }

            let Some(chapter_url) = &chapter.chapter_url else {
                continue;
            };

            let run = self.extractor.download_single(chapter_url, destination, config_path).await;
            let run = match run {
                Ok(run) if run.exit_code == 0 => run,
                Ok(run) => {
                    self.fail(id, format!("extractor exited {} downloading chapter: {}", run.exit_code, run.stderr_tail(20))).await;
                    return false;
                }
                Err(err) => {
                    self.fail(id, err.to_string()).await;
                    return false;
                }
            };
            let _ = run;

            if let Some(cbz_path) = list_cbz_files(destination).last().cloned() {
                let xml = cbz::generate_comic_info_xml(manga, &chapter);
                if let Err(err) = cbz::inject(&cbz_path, &xml) {
                    self.logger.warn(&format!("failed to inject ComicInfo.xml into {cbz_path:?}: {err}"));
                }
            }

            let _ = self.store.record_chapter_url(crate::store::models::NewChapterUrlRecord {
                manga_id: manga.id.clone(),
                url: chapter_url.clone(),
                chapter_number: chapter.chapter_number,
                volume: chapter.volume,
                title: chapter.title.clone(),
                lang: chapter.language.clone(),
                source: "mangadex".to_string(),
                upstream_chapter_id: Some(chapter.chapter_id.clone()),
                scanlation_group: chapter.scanlation_group.clone(),
            });

            let current = index as u32 + 1;
            let percent = if total == 0 { 100 } else { (current * 100) / total };
            let _ = self.store.update_progress(id, percent, current);
            self.hub.publish(
                ProgressEvent::new(ProgressEventType::Progress)
                    .for_download(id)
                    .with_percentage(percent)
                    .with_current_chapter(current),
            );
        }

        true
    }

    async fn run_whole_series(&self, id: &str, manga: &MangaMetadata, source_url: &str, destination: &Path, config_path: &Path) -> bool {
        let tracker = self.tracker.clone();
        let id_for_cancel = id.to_string();
        let is_cancelled = move || tracker.is_cancelled(&id_for_cancel);

        let store = self.store.clone();
        let hub = self.hub.clone();
        let id_owned = id.to_string();
        let on_progress = move |percent: u32, current_chapter: u32, _total: u32, _message: &str| {
            let _ = store.update_progress(&id_owned, percent, current_chapter);
            hub.publish(ProgressEvent::new(ProgressEventType::Progress).for_download(&id_owned).with_percentage(percent));
        };

        let result = self
            .extractor
            .download_series(source_url, destination, config_path, is_cancelled, |_pid| {}, on_progress)
            .await;

        match result {
            Ok(run) if run.exit_code == 0 => {
                for cbz_path in list_cbz_files(destination) {
                    let xml = cbz::generate_comic_info_xml(manga, &comic_info_descriptor(None, &manga.title));
                    if let Err(err) = cbz::inject(&cbz_path, &xml) {
                        self.logger.warn(&format!("failed to inject ComicInfo.xml into {cbz_path:?}: {err}"));
                    }
                }
                true
            }
            Ok(run) if run.cancelled => {
                let _ = self.store.update_status(id, DownloadStatus::Cancelled, None);
                self.hub.publish(ProgressEvent::new(ProgressEventType::Failed).for_download(id).with_error_message("cancelled"));
                false
            }
            Ok(run) => {
                self.fail(id, format!("extractor exited {} downloading series: {}", run.exit_code, run.stderr_tail(20))).await;
                false
            }
            Err(err) => {
                self.fail(id, err.to_string()).await;
                false
            }
        }
    }
}

impl<C: CatalogClient + 'static, L: ILogger + Send + Sync + 'static> DownloadDispatcher for DownloadExecutor<C, L> {
    async fn extractor_installed(&self) -> bool {
        self.extractor.is_installed().await
    }

    async fn dispatch(&self, id: String) {
        self.tracker.mark_active(&id);

        let Ok(Some(entry)) = self.store.find_by_id(&id) else {
            self.tracker.unmark_active(&id);
            return;
        };

        if self.tracker.is_cancelled(&id) {
            let _ = self.store.update_status(&id, DownloadStatus::Cancelled, None);
            self.tracker.unmark_active(&id);
            return;
        }

        if entry.started_at.is_some() {
            let _ = self.store.increment_retry_count(&id);
        }
        if self.store.update_status(&id, DownloadStatus::Downloading, None).is_err() {
            self.tracker.unmark_active(&id);
            return;
        }
        self.hub.publish(ProgressEvent::new(ProgressEventType::Started).for_download(&id).with_percentage(0));

        let manga = match self.extractor.get_metadata_quick(&entry.source_url, &*self.catalog).await {
            Ok(manga) => manga,
            Err(err) => {
                self.fail(&id, format!("metadata fetch failed: {err}")).await;
                return;
            }
        };

        let destination = self.library_root.join(series::sanitize_folder_name(&manga.title));
        if let Err(err) = self.store.set_destination(&id, self.library_root.to_string_lossy().as_ref(), destination.to_string_lossy().as_ref()) {
            self.logger.error(&err);
        }

        if let Err(err) = series::write_series_json(&manga, &destination, self.logger.as_ref()) {
            self.logger.warn(&format!("series.json write failed (non-fatal): {err}"));
        }
        if let Some(cover_filename) = &manga.cover_filename {
            series::write_cover(self.catalog.as_ref(), &manga.id, cover_filename, &destination, self.logger.as_ref()).await;
        }

        let config_path = match self.write_config_file(&destination) {
            Ok(path) => path,
            Err(err) => {
                self.fail(&id, err.to_string()).await;
                return;
            }
        };

        let chapters = match extract_manga_id(&entry.source_url) {
            Some(manga_id) => self.catalog.get_all_chapters(&manga_id.to_string(), &self.preferred_lang).await.unwrap_or_default(),
            None => vec![],
        };

        let succeeded = if chapters.is_empty() {
            self.run_whole_series(&id, &manga, &entry.source_url, &destination, &config_path).await
        } else {
            self.run_per_chapter(&id, &manga, chapters, &destination, &config_path).await
        };

        let _ = std::fs::remove_file(&config_path);

        if !succeeded {
            self.tracker.unmark_active(&id);
            return;
        }

        if self.tracker.is_cancelled(&id) {
            self.tracker.unmark_active(&id);
            return;
        }

        if let Err(err) = self.store.update_status(&id, DownloadStatus::Completed, None) {
            self.logger.error(&err);
        }
        self.hub.publish(ProgressEvent::new(ProgressEventType::Completed).for_download(&id).with_percentage(100));
        self.tracker.unmark_active(&id);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::models::NewDownload;

    #[test]
    fn it_tracks_active_and_cancelled_ids_independently() {
        let tracker = ActiveDownloadTracker::new();
        tracker.mark_active("a");
        assert!(tracker.is_active("a"));
        assert!(!tracker.is_cancelled("a"));

        tracker.request_cancel("a");
        assert!(tracker.is_cancelled("a"));

        tracker.unmark_active("a");
        assert!(!tracker.is_active("a"));
        assert!(!tracker.is_cancelled("a"), "unmarking active clears any cancel request too");
    }

    #[test]
    fn it_cancels_a_still_pending_entry_immediately() {
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        store
            .enqueue(NewDownload {
                id: "a".to_string(),
                source_url: "https://mangadex.org/title/a".to_string(),
                source_type: "manga".to_string(),
                title: "A".to_string(),
                author: None,
                plugin_id: "mangadex".to_string(),
                created_by: "user".to_string(),
                priority: 5,
                total_chapters: None,
                max_retries: 3,
            })
            .unwrap();

        let tracker = ActiveDownloadTracker::new();
        tracker.request_cancel("a");
        if let Some(entry) = store.find_by_id("a").unwrap() {
            if entry.status == DownloadStatus::Pending {
                store.update_status("a", DownloadStatus::Cancelled, None).unwrap();
            }
        }

        assert_eq!(store.find_by_id("a").unwrap().unwrap().status, DownloadStatus::Cancelled);
    }
}
