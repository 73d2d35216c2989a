//! Backup Lifecycle (C11): WAL-checkpointed snapshots of the queue database,
//! plus restore-with-restart.
//!
//! Grounded in the teacher's defensive `exists!`-guarded filesystem
//! conventions and the sqlite `PRAGMA`/checkpoint precedent already used by
//! [`crate::store::QueueStore::checkpoint`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::exists;
use crate::store::QueueStore;

const BACKUP_SUBDIR: &str = "backups";
const RESTORE_PROBE_ATTEMPTS: u32 = 15;
const RESTORE_PROBE_INTERVAL: Duration = Duration::from_secs(1);
const RESTART_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub backup_file_name: String,
    pub requires_restart: bool,
    pub message: String,
}

/// `path`, guarding against a backup file name that would escape
/// `backups_dir` via `..` or an absolute path.
fn resolve_backup_path(backups_dir: &Path, file_name: &str) -> AppResult<PathBuf> {
    if file_name.contains("..") || Path::new(file_name).is_absolute() || file_name.contains('/') || file_name.contains('\\') {
        return Err(AppError::AccessDenied(format!("invalid backup file name: {file_name}")));
    }
    Ok(backups_dir.join(file_name))
}

pub struct BackupManager {
    database_path: PathBuf,
    config_dir: PathBuf,
}

impl BackupManager {
    pub fn new(database_path: PathBuf, config_dir: PathBuf) -> Self {
        Self { database_path, config_dir }
    }

    fn backups_dir(&self) -> PathBuf {
        self.config_dir.join(BACKUP_SUBDIR)
    }

    fn is_in_memory(&self) -> bool {
        let path = self.database_path.to_string_lossy();
        path == ":memory:" || path.contains("mode=memory")
    }

    /// Checkpoints the live database, then copies it to
    /// `{configDir}/backups/komga_backup_YYYYMMDD_HHMMSS.db`.
    pub fn create_backup(&self, store: &QueueStore) -> AppResult<BackupFile> {
        if self.is_in_memory() {
            return Err(AppError::BadRequest("cannot back up an in-memory database".to_string()));
        }

        store.checkpoint()?;

        let backups_dir = self.backups_dir();
        if !exists!(&backups_dir) {
            std::fs::create_dir_all(&backups_dir).map_err(AppError::internal)?;
        }

        let file_name = format!("komga_backup_{}.db", Utc::now().format("%Y%m%d_%H%M%S%3f"));
        let destination = backups_dir.join(&file_name);

        std::fs::copy(&self.database_path, &destination).map_err(AppError::internal)?;
        let size_bytes = std::fs::metadata(&destination).map_err(AppError::internal)?.len();

        Ok(BackupFile { file_name, size_bytes })
    }

    /// Newest-first listing of everything in the backups directory.
    pub fn list_backups(&self) -> AppResult<Vec<BackupFile>> {
        let backups_dir = self.backups_dir();
        if !exists!(&backups_dir) {
            return Ok(vec![]);
        }

        let mut entries: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(&backups_dir)
            .map_err(AppError::internal)?
            .flatten()
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                let modified = metadata.modified().ok()?;
                Some((entry.path(), modified))
            })
            .collect();

        entries.sort_by(|a, b| b.1.cmp(&a.1));

        entries
            .into_iter()
            .map(|(path, _)| {
                let size_bytes = std::fs::metadata(&path).map_err(AppError::internal)?.len();
                let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                Ok(BackupFile { file_name, size_bytes })
            })
            .collect()
    }

    /// Reads a backup file's raw bytes for the download-backup REST endpoint.
    pub fn read_backup(&self, file_name: &str) -> AppResult<Vec<u8>> {
        let path = resolve_backup_path(&self.backups_dir(), file_name)?;
        if !exists!(&path) {
            return Err(AppError::NotFound(format!("no such backup: {file_name}")));
        }
        std::fs::read(&path).map_err(AppError::internal)
    }

    pub fn delete_backup(&self, file_name: &str) -> AppResult<()> {
        let path = resolve_backup_path(&self.backups_dir(), file_name)?;
        if !exists!(&path) {
            return Err(AppError::NotFound(format!("no such backup: {file_name}")));
        }
        std::fs::remove_file(&path).map_err(AppError::internal)?;
        Ok(())
    }

    /// Keeps the `keep` newest backups, deletes the rest, and returns how
    /// many were deleted.
    pub fn clean_old_backups(&self, keep: usize) -> AppResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;

        for backup in backups.into_iter().skip(keep) {
            self.delete_backup(&backup.file_name)?;
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Checkpoints and closes the live connection, waits (up to 15 attempts,
    /// 1s apart) for the database file to no longer be locked, removes any
    /// WAL/SHM sidecar files, copies the backup over the live file, then
    /// schedules a 2-second-delayed process exit so a fresh process reopens
    /// the restored file.
    pub async fn restore_backup(&self, file_name: &str, store: &QueueStore) -> AppResult<RestoreOutcome> {
        let backup_path = resolve_backup_path(&self.backups_dir(), file_name)?;
        if !exists!(&backup_path) {
            return Err(AppError::NotFound(format!("no such backup: {file_name}")));
        }

        store.checkpoint()?;

        let mut probe_path = self.database_path.clone();
        probe_path.set_extension("restore-probe");

        let mut unlocked = false;
        for _ in 0..RESTORE_PROBE_ATTEMPTS {
            if std::fs::rename(&self.database_path, &probe_path).is_ok() {
                std::fs::rename(&probe_path, &self.database_path).map_err(AppError::internal)?;
                unlocked = true;
                break;
            }
            tokio::time::sleep(RESTORE_PROBE_INTERVAL).await;
        }

        if !unlocked {
            return Err(AppError::internal("database file remained locked while preparing for restore"));
        }

        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{suffix}", self.database_path.to_string_lossy()));
            if exists!(&sidecar) {
                let _ = std::fs::remove_file(&sidecar);
            }
        }

        std::fs::copy(&backup_path, &self.database_path).map_err(AppError::internal)?;

        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            std::process::exit(0);
        });

        Ok(RestoreOutcome {
            backup_file_name: file_name.to_string(),
            requires_restart: true,
            message: "database restored; process will exit in 2 seconds for a supervisor restart".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_rejects_path_traversal_backup_file_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_backup_path(dir.path(), "../etc/passwd").is_err());
        assert!(resolve_backup_path(dir.path(), "/etc/passwd").is_err());
        assert!(resolve_backup_path(dir.path(), "sub/dir.db").is_err());
        assert!(resolve_backup_path(dir.path(), "komga_backup_20260101_000000.db").is_ok());
    }

    #[test]
    fn it_creates_lists_and_deletes_backups() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.sqlite");
        let store = QueueStore::open(db_path.to_str().unwrap()).unwrap();

        let manager = BackupManager::new(db_path, dir.path().to_path_buf());
        let created = manager.create_backup(&store).unwrap();

        let listed = manager.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_name, created.file_name);

        manager.delete_backup(&created.file_name).unwrap();
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn it_keeps_only_the_newest_backups_when_cleaning() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.sqlite");
        let store = QueueStore::open(db_path.to_str().unwrap()).unwrap();
        let manager = BackupManager::new(db_path, dir.path().to_path_buf());

        for _ in 0..3 {
            manager.create_backup(&store).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }

        let deleted = manager.clean_old_backups(1).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(manager.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn it_refuses_to_back_up_an_in_memory_database() {
        let manager = BackupManager::new(PathBuf::from(":memory:"), PathBuf::from("/tmp"));
        let store = QueueStore::open_in_memory().unwrap();
        assert!(manager.create_backup(&store).is_err());
    }
}
