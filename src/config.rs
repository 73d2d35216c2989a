//! Configuration management.
//!
//! Carries over the teacher's `ConfigParam`/`TableParam`/`ConfigBuilder` TOML
//! file management idiom from `manga-tui`'s `src/config.rs`, scaled down to
//! the handful of settings this service actually has: where the database and
//! downloads live, the extractor binary override, and scheduler cadences.

use std::error::Error;
use std::fmt::Write as FmtWrite;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use toml::Table;

use crate::exists;

static CONFIG_FILE_NAME: &str = "config.toml";
static CONFIG_FILE_NAME_BACKUP: &str = "config_backup.toml";

static CONFIG: OnceCell<OrchestratorConfig> = OnceCell::new();

pub static CONFIG_DIR_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    if let Ok(dir) = std::env::var("KOMGA_DL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    directories::ProjectDirs::from("", "", "komga-dl-orchestrator")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".komga-dl-orchestrator"))
});

/// A single scalar `name = value` config entry.
trait ConfigParam {
    fn name(&self) -> &'static str;
    fn comments(&self) -> &'static str;
    fn values(&self) -> &'static str;
    fn defaults(&self) -> &'static str;

    fn param(&self) -> String {
        format!("{} = {}", self.name(), self.defaults())
    }

    fn build_parameter(&self) -> String {
        let comments = self.comments();
        let values = self.values();
        let defaults = self.defaults();
        let param = self.param();

        format!("# {comments}\n# values: {values}\n# default: {defaults}\n{param}\n\n")
    }
}

/// A TOML table of related config parameters.
trait TableParam {
    fn table_name(&self) -> &'static str;
    fn comments(&self) -> &'static str;
    fn parameters(&self) -> Vec<Box<dyn ConfigParam>>;

    fn add_parameters(&self, params: Vec<Box<dyn ConfigParam>>) -> String {
        params.iter().fold(String::new(), |mut accum, param| {
            let _ = write!(accum, "{}", param.build_parameter());
            accum
        })
    }

    fn build_full_table(&self) -> String {
        let table_name = self.table_name();
        let comments = self.comments();
        let added_parameters = self.add_parameters(self.parameters());

        format!("# {comments}\n[{table_name}]\n{added_parameters}")
    }
}

#[derive(Debug, Default)]
struct DataDirParam;

impl ConfigParam for DataDirParam {
    fn name(&self) -> &'static str {
        "data_dir"
    }

    fn comments(&self) -> &'static str {
        "Directory holding the queue database, backups and default downloads"
    }

    fn values(&self) -> &'static str {
        "any absolute path"
    }

    fn defaults(&self) -> &'static str {
        r#""downloads""#
    }
}

#[derive(Debug, Default)]
struct ExtractorBinaryParam;

impl ConfigParam for ExtractorBinaryParam {
    fn name(&self) -> &'static str {
        "extractor_binary"
    }

    fn comments(&self) -> &'static str {
        "Override for the gallery-dl binary; leave empty to auto-resolve"
    }

    fn values(&self) -> &'static str {
        "a path or empty string"
    }

    fn defaults(&self) -> &'static str {
        r#""""#
    }
}

#[derive(Debug, Default)]
struct RateLimitPerSecondParam;

impl ConfigParam for RateLimitPerSecondParam {
    fn name(&self) -> &'static str {
        "rate_limit_per_second"
    }

    fn comments(&self) -> &'static str {
        "Max outbound catalog requests issued per second"
    }

    fn values(&self) -> &'static str {
        "positive integer"
    }

    fn defaults(&self) -> &'static str {
        "5"
    }
}

#[derive(Debug, Default)]
struct RateLimitPerMinuteParam;

impl ConfigParam for RateLimitPerMinuteParam {
    fn name(&self) -> &'static str {
        "rate_limit_per_minute"
    }

    fn comments(&self) -> &'static str {
        "Max outbound catalog requests issued per minute"
    }

    fn values(&self) -> &'static str {
        "positive integer"
    }

    fn defaults(&self) -> &'static str {
        "40"
    }
}

#[derive(Debug, Default)]
struct ServerPortParam;

impl ConfigParam for ServerPortParam {
    fn name(&self) -> &'static str {
        "server_port"
    }

    fn comments(&self) -> &'static str {
        "TCP port the REST and progress-websocket server binds on"
    }

    fn values(&self) -> &'static str {
        "1-65535"
    }

    fn defaults(&self) -> &'static str {
        "7272"
    }
}

fn config_params() -> Vec<Box<dyn ConfigParam>> {
    vec![
        Box::new(DataDirParam),
        Box::new(ExtractorBinaryParam),
        Box::new(RateLimitPerSecondParam),
        Box::new(RateLimitPerMinuteParam),
        Box::new(ServerPortParam),
    ]
}

#[derive(Debug, Default)]
struct ProcessQueueIntervalParam;

impl ConfigParam for ProcessQueueIntervalParam {
    fn name(&self) -> &'static str {
        "process_queue_interval_secs"
    }

    fn comments(&self) -> &'static str {
        "How often the scheduler attempts to dispatch the next queued download"
    }

    fn values(&self) -> &'static str {
        "positive integer"
    }

    fn defaults(&self) -> &'static str {
        "30"
    }
}

#[derive(Debug, Default)]
struct AutoRetryIntervalParam;

impl ConfigParam for AutoRetryIntervalParam {
    fn name(&self) -> &'static str {
        "auto_retry_interval_secs"
    }

    fn comments(&self) -> &'static str {
        "How often the scheduler looks for failed downloads eligible for auto-retry"
    }

    fn values(&self) -> &'static str {
        "positive integer"
    }

    fn defaults(&self) -> &'static str {
        "300"
    }
}

#[derive(Debug, Default)]
struct SchedulerTable;

impl TableParam for SchedulerTable {
    fn table_name(&self) -> &'static str {
        "scheduler"
    }

    fn comments(&self) -> &'static str {
        "Tick cadences for the background scheduler"
    }

    fn parameters(&self) -> Vec<Box<dyn ConfigParam>> {
        vec![Box::new(ProcessQueueIntervalParam), Box::new(AutoRetryIntervalParam)]
    }
}

fn table_config_params() -> Vec<Box<dyn TableParam>> {
    vec![Box::new(SchedulerTable)]
}

/// Creation/update/write of the config file, following manga-tui's builder.
struct ConfigBuilder<'a> {
    params: Vec<Box<dyn ConfigParam>>,
    table_params: Vec<Box<dyn TableParam>>,
    base_directory: &'a Path,
}

impl<'a> ConfigBuilder<'a> {
    fn new() -> Self {
        Self {
            table_params: table_config_params(),
            params: config_params(),
            base_directory: Path::new("./"),
        }
    }

    fn dir_path<P: AsRef<Path> + ?Sized>(mut self, dir_path: &'a P) -> Self {
        self.base_directory = dir_path.as_ref();
        self
    }

    fn create_directory_if_not_exists(&self) -> std::io::Result<()> {
        if !exists!(self.base_directory) {
            create_dir_all(self.base_directory)?
        }
        Ok(())
    }

    fn get_config_file_path(&self) -> PathBuf {
        self.base_directory.join(CONFIG_FILE_NAME)
    }

    fn get_config_backup_file_path(&self) -> PathBuf {
        self.base_directory.join(CONFIG_FILE_NAME_BACKUP)
    }

    fn create_file_if_not_exists(&self) -> Result<File, Box<dyn Error>> {
        self.create_directory_if_not_exists()?;

        let config_path = self.get_config_file_path();

        let mut open_options = OpenOptions::new();
        open_options.append(true).read(true);

        let file = if !exists!(&config_path) {
            let mut file = File::create_new(&config_path)?;
            self.write_config(&mut file)?;
            open_options.open(config_path)?
        } else {
            let mut file = open_options.open(&config_path)?;
            self.update_existing_config(&mut file)?
        };

        Ok(file)
    }

    fn write_config(&self, mut file: impl Write) -> std::io::Result<()> {
        for config_param in &self.params {
            file.write_all(config_param.build_parameter().as_bytes())?;
        }

        for table_param in &self.table_params {
            file.write_all(table_param.build_full_table().as_bytes())?
        }

        file.flush()
    }

    /// Tables must come after scalar parameters in TOML, so missing tables
    /// are appended at the end of the file rather than interleaved.
    fn append_missing_table_params(&self, file_contents: &str) -> Result<String, Box<dyn Error>> {
        let as_toml: Table = file_contents.parse()?;
        let mut updated_config = file_contents.to_string();

        for table in &self.table_params {
            if !as_toml.contains_key(table.table_name()) {
                updated_config = format!("{updated_config}{}", table.build_full_table());
            }
        }

        Ok(updated_config)
    }

    /// Scalar parameters appearing after a table are parsed as belonging to
    /// that table, so missing scalars are prepended to the top of the file.
    fn prepend_missing_config_param(&self, file_contents: &str) -> Result<String, Box<dyn Error>> {
        let as_toml: Table = file_contents.parse()?;
        let mut updated_config = file_contents.to_string();

        for param in &self.params {
            if !as_toml.contains_key(param.name()) {
                updated_config = format!("{}{updated_config}", param.build_parameter());
            }
        }

        Ok(updated_config)
    }

    fn update_existing_config(&self, mut config: impl Write + Read) -> Result<File, Box<dyn Error>> {
        let mut contents = String::new();
        config.read_to_string(&mut contents)?;

        let updated = self.prepend_missing_config_param(&contents)?;
        let updated = self.append_missing_table_params(&updated)?;

        self.commit_changes(&updated)
    }

    fn commit_changes(&self, updated_config: &str) -> Result<File, Box<dyn Error>> {
        let config_file_path = self.get_config_file_path();
        let config_file_backup_path = self.get_config_backup_file_path();

        std::fs::copy(&config_file_path, &config_file_backup_path)?;
        std::fs::remove_file(&config_file_path)?;

        let mut open_options = OpenOptions::new();
        open_options.append(true).read(true).create(true);

        let mut new_config = open_options.open(&config_file_path)?;
        new_config.write_all(updated_config.as_bytes())?;
        new_config.flush()?;

        let new_config = open_options.open(config_file_path)?;
        std::fs::remove_file(&config_file_backup_path)?;

        Ok(new_config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerDefaults {
    pub process_queue_interval_secs: u64,
    pub auto_retry_interval_secs: u64,
}

impl Default for SchedulerDefaults {
    fn default() -> Self {
        Self {
            process_queue_interval_secs: 30,
            auto_retry_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub extractor_binary: String,
    #[serde(default = "default_rate_per_second")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_rate_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub scheduler: SchedulerDefaults,
}

fn default_rate_per_second() -> u32 {
    5
}

fn default_rate_per_minute() -> u32 {
    40
}

fn default_server_port() -> u16 {
    7272
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("downloads"),
            extractor_binary: String::new(),
            rate_limit_per_second: default_rate_per_second(),
            rate_limit_per_minute: default_rate_per_minute(),
            server_port: default_server_port(),
            scheduler: SchedulerDefaults::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn get() -> &'static Self {
        CONFIG.get_or_init(OrchestratorConfig::default)
    }

    fn read_config_file(mut config: impl Read) -> Result<Self, Box<dyn Error>> {
        let mut contents = String::new();
        config.read_to_string(&mut contents)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Creates or updates the config file under `CONFIG_DIR_PATH` and sets the global config.
pub fn build_config_file() -> Result<(), Box<dyn Error>> {
    let path = CONFIG_DIR_PATH.as_path();

    let config_builder = ConfigBuilder::new().dir_path(path);
    let mut config_file = config_builder.create_file_if_not_exists()?;

    let config = OrchestratorConfig::read_config_file(&mut config_file).unwrap_or_default();

    CONFIG.get_or_init(|| config);

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn it_parses_defaults_from_an_empty_style_toml() {
        let raw = r#"
data_dir = "downloads"

[scheduler]
process_queue_interval_secs = 30
auto_retry_interval_secs = 300
"#;
        let config: OrchestratorConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.rate_limit_per_second, 5);
        assert_eq!(config.rate_limit_per_minute, 40);
        assert_eq!(config.extractor_binary, "");
    }

    #[test]
    fn it_writes_a_new_config_file_with_all_defaults() {
        let dir = tempdir().unwrap();
        let builder = ConfigBuilder::new().dir_path(dir.path());

        let mut file = builder.create_file_if_not_exists().unwrap();

        let config = OrchestratorConfig::read_config_file(&mut file).unwrap();

        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn it_adds_missing_scalar_and_table_params_to_an_existing_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&config_path, "data_dir = \"custom\"\n").unwrap();

        let builder = ConfigBuilder::new().dir_path(dir.path());
        let mut file = builder.create_file_if_not_exists().unwrap();

        let config = OrchestratorConfig::read_config_file(&mut file).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("custom"));
        assert_eq!(config.rate_limit_per_second, 5);
        assert_eq!(config.scheduler.process_queue_interval_secs, 30);
    }
}
