//! Wiring layer: constructs every component once at startup and holds the
//! process-scoped state spec.md §9 calls out as fields of a single
//! long-lived value rather than module-level globals.

use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::BackupManager;
use crate::catalog::mangadex::{Mangadex, API_URL_BASE, COVER_IMG_URL_BASE};
use crate::checker::ChapterChecker;
use crate::config::OrchestratorConfig;
use crate::executor::{ActiveDownloadTracker, DownloadExecutor};
use crate::extractor::{resolve_extractor_binary, ExtractorDriver};
use crate::logger::{ILogger, Logger};
use crate::progress::ProgressHub;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::{Scheduler, SchedulerIntervals};
use crate::store::QueueStore;

type Catalog = Mangadex<Logger>;

pub struct Orchestrator {
    pub store: Arc<QueueStore>,
    pub catalog: Arc<Catalog>,
    pub extractor: Arc<ExtractorDriver<Logger>>,
    pub hub: Arc<ProgressHub>,
    pub executor: Arc<DownloadExecutor<Catalog, Logger>>,
    pub scheduler: Arc<Scheduler<DownloadExecutor<Catalog, Logger>, Catalog, Logger>>,
    pub backup: Arc<BackupManager>,
    library_root: PathBuf,
}

impl Orchestrator {
    /// Resolves the extractor binary, opens the queue database, and wires
    /// every component together. Does not spawn the scheduler's background
    /// ticks — call [`Self::start`] for that once the caller is ready to
    /// serve traffic.
    pub async fn build(config: &OrchestratorConfig, database_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let store = Arc::new(QueueStore::open(database_path)?);
        let rate_limiter = RateLimiter::new(config.rate_limit_per_second, config.rate_limit_per_minute);
        let catalog = Arc::new(Mangadex::new(API_URL_BASE.parse()?, COVER_IMG_URL_BASE.parse()?, rate_limiter, Logger));

        let binary = if config.extractor_binary.is_empty() {
            match resolve_extractor_binary().await {
                Some(binary) => binary,
                None => {
                    Logger.warn("no gallery-dl-compatible extractor found on PATH; the scheduler will skip dispatch ticks until one is installed");
                    vec!["gallery-dl".to_string()]
                }
            }
        } else {
            vec![config.extractor_binary.clone()]
        };
        let extractor = Arc::new(ExtractorDriver::new(binary, Logger));

        let hub = Arc::new(ProgressHub::new());
        let tracker = ActiveDownloadTracker::new();
        let library_root = config.data_dir.clone();

        let executor = Arc::new(DownloadExecutor::new(
            store.clone(),
            catalog.clone(),
            extractor.clone(),
            hub.clone(),
            Arc::new(Logger),
            tracker,
            library_root.clone(),
            "en".to_string(),
        ));

        let checker = Arc::new(ChapterChecker::new(catalog.clone(), store.clone()));

        let intervals = SchedulerIntervals {
            process_queue: std::time::Duration::from_secs(config.scheduler.process_queue_interval_secs),
            auto_retry: std::time::Duration::from_secs(config.scheduler.auto_retry_interval_secs),
            ..SchedulerIntervals::default()
        };

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            executor.clone(),
            checker,
            Arc::new(Logger),
            library_root.clone(),
            "en".to_string(),
            intervals,
        ));

        let backup = Arc::new(BackupManager::new(PathBuf::from(database_path), crate::config::CONFIG_DIR_PATH.clone()));

        Ok(Self {
            store,
            catalog,
            extractor,
            hub,
            executor,
            scheduler,
            backup,
            library_root,
        })
    }

    pub fn start(&self) {
        self.scheduler.spawn();
    }

    pub fn library_root(&self) -> &std::path::Path {
        &self.library_root
    }
}
