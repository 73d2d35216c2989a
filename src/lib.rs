//! komga-dl-orchestrator: a headless manga download orchestrator.
//!
//! Components are grouped by responsibility (rate limiting, catalog access,
//! the extractor subprocess, post-processing, persistence, scheduling,
//! execution, progress fan-out, backup) and wired together once in
//! [`orchestrator::Orchestrator`]. The `api` module exposes them over REST
//! and a WebSocket progress channel.

pub mod api;
pub mod backup;
pub mod catalog;
pub mod cbz;
pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod logger;
pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;
pub mod scheduler;
pub mod series;
pub mod store;

/// Checks whether a path exists without treating a permissions error as "missing".
#[macro_export]
macro_rules! exists {
    ($path:expr) => {
        std::path::Path::new(&$path).try_exists().is_ok_and(|is_true| is_true)
    };
}

/// A manga/chapter display title with filesystem-hostile characters scrubbed.
///
/// Mirrors `series::sanitize_folder_name`; kept as a newtype so callers can't
/// accidentally use an un-sanitized `String` where a path component is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SanitizedFilename(String);

impl SanitizedFilename {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SanitizedFilename {
    fn from(value: String) -> Self {
        Self(crate::series::sanitize_folder_name(&value))
    }
}

impl std::fmt::Display for SanitizedFilename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
