//! Scheduler (C8): three independent periodic tasks driving the queue.
//!
//! Grounded in the non-reentrant-processing-flag idiom the teacher uses
//! around its cache/database globals, realized here with
//! `tokio::time::interval` plus an `Arc<AtomicBool>` compare-exchange gate
//! instead of a `Lazy<Mutex<...>>` flag, since each tick is spawned as its
//! own task rather than run from a shared event loop.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::catalog::CatalogClient;
use crate::checker::ChapterChecker;
use crate::logger::ILogger;
use crate::store::models::DownloadStatus;
use crate::store::QueueStore;

/// Implemented by whatever drives a single queued download (the Download
/// Executor); kept as a trait so the scheduler can be tested without a real
/// extractor/catalog/filesystem stack behind it.
pub trait DownloadDispatcher: Send + Sync {
    fn dispatch(&self, download_id: String) -> impl Future<Output = ()> + Send;

    /// Whether the extractor binary this dispatcher drives is currently
    /// reachable. Checked once per `process_queue_tick` so a missing
    /// extractor degrades to a logged WARN instead of a boot-time failure.
    fn extractor_installed(&self) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerIntervals {
    pub process_queue: Duration,
    pub process_queue_initial_delay: Duration,
    pub auto_retry: Duration,
    pub auto_retry_initial_delay: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            process_queue: Duration::from_secs(30),
            process_queue_initial_delay: Duration::from_secs(10),
            auto_retry: Duration::from_secs(5 * 60),
            auto_retry_initial_delay: Duration::from_secs(60),
        }
    }
}

/// Linear auto-retry backoff: `(retryCount + 1) * 5 minutes` since the entry
/// last transitioned to FAILED.
fn retry_backoff(retry_count: u32) -> chrono::Duration {
    chrono::Duration::minutes(5 * (retry_count as i64 + 1))
}

pub struct Scheduler<D: DownloadDispatcher, C: CatalogClient, L: ILogger> {
    store: Arc<QueueStore>,
    dispatcher: Arc<D>,
    checker: Arc<ChapterChecker<C>>,
    logger: Arc<L>,
    library_root: PathBuf,
    preferred_lang: String,
    intervals: SchedulerIntervals,
    process_queue_gate: Arc<AtomicBool>,
}

impl<D: DownloadDispatcher + 'static, C: CatalogClient + 'static, L: ILogger + Send + Sync + 'static> Scheduler<D, C, L> {
    pub fn new(
        store: Arc<QueueStore>,
        dispatcher: Arc<D>,
        checker: Arc<ChapterChecker<C>>,
        logger: Arc<L>,
        library_root: PathBuf,
        preferred_lang: String,
        intervals: SchedulerIntervals,
    ) -> Self {
        Self {
            store,
            dispatcher,
            checker,
            logger,
            library_root,
            preferred_lang,
            intervals,
            process_queue_gate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the three background ticks. A schedule change only affects the
    /// *next* tick's interval; the tick currently running is never preempted.
    pub fn spawn(self: &Arc<Self>) {
        self.clone().spawn_process_queue_loop();
        self.clone().spawn_auto_retry_loop();
        self.clone().spawn_follow_list_loop();
    }

    fn spawn_process_queue_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(self.intervals.process_queue_initial_delay).await;
            let mut ticker = tokio::time::interval(self.intervals.process_queue);
            loop {
                ticker.tick().await;
                self.process_queue_tick().await;
            }
        });
    }

    fn spawn_auto_retry_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(self.intervals.auto_retry_initial_delay).await;
            let mut ticker = tokio::time::interval(self.intervals.auto_retry);
            loop {
                ticker.tick().await;
                self.auto_retry_tick().await;
            }
        });
    }

    fn spawn_follow_list_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let config = self.store.get_follow_config().unwrap_or_default();
                let sleep_for = Duration::from_secs(u64::from(config.check_interval_hours.max(1)) * 60 * 60);
                tokio::time::sleep(sleep_for).await;

                let config = self.store.get_follow_config().unwrap_or_default();
                if config.enabled {
                    self.run_library_check_now().await;
                }
            }
        });
    }

    /// Dispatches at most one PENDING entry per tick; non-reentrant so a slow
    /// dispatch never overlaps the next tick's attempt.
    async fn process_queue_tick(&self) {
        if self.process_queue_gate.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }

        if !self.dispatcher.extractor_installed().await {
            self.logger.warn("extractor is not installed; skipping this tick");
            self.process_queue_gate.store(false, Ordering::Release);
            return;
        }

        let next = self.store.find_pending_ordered().ok().and_then(|mut pending| {
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        });

        if let Some(entry) = next {
            self.dispatcher.dispatch(entry.id).await;
        }

        self.process_queue_gate.store(false, Ordering::Release);
    }

    /// Flips eligible FAILED entries back to PENDING. Does not itself
    /// increment `retry_count` — that happens in the executor at the next
    /// dispatch, immediately before the PENDING -> DOWNLOADING transition.
    async fn auto_retry_tick(&self) {
        let Ok(failed) = self.store.find_by_status(DownloadStatus::Failed) else {
            return;
        };

        let now = Utc::now();
        for entry in failed {
            if entry.retry_count >= entry.max_retries {
                continue;
            }

            let eligible_at = entry.last_modified + retry_backoff(entry.retry_count);
            if now < eligible_at {
                continue;
            }

            if let Err(err) = self.store.update_status(&entry.id, DownloadStatus::Pending, None) {
                self.logger.error(&err);
            }
        }
    }

    /// Runs a follow-list sweep immediately, outside the periodic schedule.
    pub async fn run_library_check_now(&self) {
        let config = self.store.get_follow_config().unwrap_or_default();
        let urls: Vec<String> = config
            .urls
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        if urls.is_empty() {
            return;
        }

        self.checker.check_and_queue_new_chapters(urls, &self.preferred_lang, &self.library_root).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::{CatalogError, ChapterDescriptor, ChapterFeedPage, ImageQuality, MangaMetadata};
    use crate::logger::DefaultLogger;
    use crate::store::models::NewDownload;

    struct StubCatalog;

    impl CatalogClient for StubCatalog {
        async fn get_manga(&self, _manga_id: &str) -> Result<Option<MangaMetadata>, CatalogError> {
            Ok(None)
        }
        async fn get_chapter_feed(&self, _manga_id: &str, _lang: &str, _limit: u32, _offset: u32) -> Result<ChapterFeedPage, CatalogError> {
            Ok(ChapterFeedPage::default())
        }
        async fn get_all_chapters(&self, _manga_id: &str, _lang: &str) -> Result<Vec<ChapterDescriptor>, CatalogError> {
            Ok(vec![])
        }
        async fn get_chapter(&self, _chapter_id: &str) -> Result<Option<ChapterDescriptor>, CatalogError> {
            Ok(None)
        }
        async fn search_manga(&self, _query: &str, _limit: u32) -> Result<Vec<MangaMetadata>, CatalogError> {
            Ok(vec![])
        }
        async fn download_cover(&self, _manga_id: &str, _cover_filename: &str, _quality: ImageQuality) -> Result<Option<Vec<u8>>, CatalogError> {
            Ok(None)
        }
        async fn count_translated_chapters(&self, _manga_id: &str, _lang: &str) -> Result<u32, CatalogError> {
            Ok(0)
        }
    }

    struct CountingDispatcher {
        calls: AtomicUsize,
        installed: bool,
    }

    impl CountingDispatcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                installed: true,
            }
        }
    }

    impl DownloadDispatcher for CountingDispatcher {
        async fn dispatch(&self, _download_id: String) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn extractor_installed(&self) -> bool {
            self.installed
        }
    }

    fn build_scheduler(store: Arc<QueueStore>, dispatcher: Arc<CountingDispatcher>) -> Scheduler<CountingDispatcher, StubCatalog, DefaultLogger> {
        let checker = Arc::new(ChapterChecker::new(Arc::new(StubCatalog), store.clone()));
        Scheduler::new(
            store,
            dispatcher,
            checker,
            Arc::new(DefaultLogger),
            PathBuf::from("."),
            "en".to_string(),
            SchedulerIntervals::default(),
        )
    }

    #[tokio::test]
    async fn it_dispatches_one_pending_entry_per_tick() {
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

        let dispatcher = Arc::new(CountingDispatcher::new());
        let scheduler = build_scheduler(store, dispatcher.clone());

        scheduler.process_queue_tick().await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);

        scheduler.process_queue_tick().await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1, "no second pending entry should exist");
    }

    #[tokio::test]
    async fn it_skips_the_tick_when_the_extractor_is_not_installed() {
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

        let dispatcher = Arc::new(CountingDispatcher {
            calls: AtomicUsize::new(0),
            installed: false,
        });
        let scheduler = build_scheduler(store.clone(), dispatcher.clone());

        scheduler.process_queue_tick().await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        let entry = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Pending, "entry should remain untouched in the queue");
    }

    #[tokio::test]
    async fn it_does_not_retry_before_the_backoff_elapses() {
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
        store.update_status("a", DownloadStatus::Failed, Some("boom")).unwrap();

        let dispatcher = Arc::new(CountingDispatcher::new());
        let scheduler = build_scheduler(store.clone(), dispatcher);

        scheduler.auto_retry_tick().await;
        let entry = store.find_by_id("a").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Failed, "backoff has not elapsed yet");
    }

    #[tokio::test]
    async fn it_skips_a_library_check_when_no_urls_are_configured() {
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        let dispatcher = Arc::new(CountingDispatcher::new());
        let scheduler = build_scheduler(store.clone(), dispatcher);

        scheduler.run_library_check_now().await;
        assert!(store.list_all_descending().unwrap().is_empty());
    }
}
