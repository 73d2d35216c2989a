//! Extractor Driver (C3): drives the external `gallery-dl` extractor as a
//! child process, one URL at a time, and observes its progress.
//!
//! No teacher file drives an external subprocess directly; the
//! read-loop/progress-channel shape is grounded in
//! `src/backend/download.rs`'s channel-based progress plumbing
//! (`MangaPageEvents`), generalized here from an in-process page downloader
//! to a `tokio::process::Command` child whose stdout/stderr are read the
//! same way the teacher reads HTTP response bodies: line-by-line into a
//! bounded buffer, mirrored to the debug log.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::catalog::{extract_manga_id, CatalogClient, MangaMetadata};
use crate::error::{AppError, AppResult};
use crate::logger::ILogger;

const METADATA_TIMEOUT: Duration = Duration::from_secs(60);
const PER_CHAPTER_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const PER_SERIES_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const RESOLVE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const STREAM_BUFFER_LINES: usize = 500;

static PROGRESS_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})%.*?([\d.]+\s?[KMG]?i?B)(?:\s*([\d.]+\s?[KMG]?i?B)/s)?").expect("static regex is valid"));

/// Candidate invocations for locating the extractor, tried in order.
const RESOLVER_CANDIDATES: &[&[&str]] = &[&["gallery-dl", "--version"], &["python3", "-m", "gallery_dl", "--version"], &["python", "-m", "gallery_dl", "--version"]];

/// Per-site placement override: non-default `directory`/`filename` patterns.
#[derive(Debug, Clone)]
pub struct SiteStanza {
    pub site: &'static str,
    pub directory: &'static str,
    pub filename: &'static str,
}

/// Internal constant, overridable at build time by swapping this function's
/// body (spec.md §4.3: "must be overridable at build time").
pub fn per_site_table() -> &'static [SiteStanza] {
    &[SiteStanza {
        site: "mangadex",
        directory: "{manga[title]}/{language}",
        filename: "{chapter:>03}_{page:>03}.{extension}",
    }]
}

#[derive(Debug, Clone)]
pub struct ExtractorIdentity {
    pub preferred_language: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Deterministic extractor config file content (gallery-dl's JSON config
/// shape), generated from `{preferredLanguage, optionalUsername,
/// optionalPassword, perSiteTable}`.
pub fn generate_config_file(identity: &ExtractorIdentity) -> String {
    let mut extractor = serde_json::Map::new();
    extractor.insert("base-directory".to_string(), serde_json::Value::String("./".to_string()));
    extractor.insert("lang".to_string(), serde_json::Value::String(identity.preferred_language.clone()));

    if let Some(username) = &identity.username {
        extractor.insert("username".to_string(), serde_json::Value::String(username.clone()));
    }
    if let Some(password) = &identity.password {
        extractor.insert("password".to_string(), serde_json::Value::String(password.clone()));
    }

    let mut sites = serde_json::Map::new();
    for stanza in per_site_table() {
        let mut site_config = serde_json::Map::new();
        site_config.insert("directory".to_string(), serde_json::Value::String(stanza.directory.to_string()));
        site_config.insert("filename".to_string(), serde_json::Value::String(stanza.filename.to_string()));
        sites.insert(stanza.site.to_string(), serde_json::Value::Object(site_config));
    }
    extractor.insert("extractor".to_string(), serde_json::Value::Object(sites));

    let mut postprocessors = Vec::new();
    let mut cbz = serde_json::Map::new();
    cbz.insert("name".to_string(), serde_json::Value::String("zip".to_string()));
    cbz.insert("compression".to_string(), serde_json::Value::String("store".to_string()));
    cbz.insert("delete".to_string(), serde_json::Value::Bool(true));
    postprocessors.push(serde_json::Value::Object(cbz));

    let mut root = serde_json::Map::new();
    root.insert("extractor".to_string(), serde_json::Value::Object(extractor));
    root.insert("postprocessors".to_string(), serde_json::Value::Array(postprocessors));

    serde_json::to_string_pretty(&serde_json::Value::Object(root)).expect("config map serializes")
}

/// Tries each resolver candidate's `--version` invocation in order; the
/// first that exits 0 within 2 seconds is used.
pub async fn resolve_extractor_binary() -> Option<Vec<String>> {
    for candidate in RESOLVER_CANDIDATES {
        let mut command = Command::new(candidate[0]);
        command.args(&candidate[1..]).stdout(Stdio::null()).stderr(Stdio::null());

        let probe = timeout(RESOLVE_PROBE_TIMEOUT, command.status()).await;
        if let Ok(Ok(status)) = probe {
            if status.success() {
                return Some(candidate.iter().map(|s| s.to_string()).collect());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorRunResult {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub cancelled: bool,
}

impl ExtractorRunResult {
    pub fn stderr_tail(&self, lines: usize) -> String {
        self.stderr.iter().rev().take(lines).rev().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn push_bounded(buffer: &mut Vec<String>, line: String) {
    buffer.push(line);
    if buffer.len() > STREAM_BUFFER_LINES {
        buffer.remove(0);
    }
}

/// Parses an extractor alt-title/metadata simulate-mode heuristic language
/// tag from a script-detection pass over the title's characters.
fn detect_script_language(title: &str) -> &'static str {
    let mut has_hiragana_katakana = false;
    let mut has_hangul = false;
    let mut has_cjk = false;

    for c in title.chars() {
        let code = c as u32;
        if (0x3040..=0x30FF).contains(&code) {
            has_hiragana_katakana = true;
        } else if (0xAC00..=0xD7A3).contains(&code) {
            has_hangul = true;
        } else if (0x4E00..=0x9FFF).contains(&code) {
            has_cjk = true;
        }
    }

    if has_hiragana_katakana {
        "ja"
    } else if has_hangul {
        "ko"
    } else if has_cjk {
        "zh"
    } else {
        "unknown"
    }
}

pub struct ExtractorDriver<L: ILogger> {
    binary: Vec<String>,
    logger: L,
}

impl<L: ILogger> ExtractorDriver<L> {
    pub fn new(binary: Vec<String>, logger: L) -> Self {
        Self { binary, logger }
    }

    /// `getMetadataQuick(url)`: first try the catalog client if `url` is a
    /// catalog URL; otherwise fall back to a simulate-mode extractor
    /// invocation that emits line-delimited `[type, url, metadataObj]`
    /// tuples.
    pub async fn get_metadata_quick<C: CatalogClient>(&self, url: &str, catalog: &C) -> AppResult<MangaMetadata> {
        if let Some(manga_id) = extract_manga_id(url) {
            if let Some(metadata) = catalog.get_manga(&manga_id.to_string()).await.map_err(AppError::internal)? {
                return Ok(metadata);
            }
        }

        self.simulate_metadata(url).await
    }

    async fn simulate_metadata(&self, url: &str) -> AppResult<MangaMetadata> {
        let mut command = self.base_command();
        command.arg(url).arg("--simulate").stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(AppError::internal)?;
        let stdout = child.stdout.take().expect("piped stdout");

        let run = async {
            let mut reader = BufReader::new(stdout).lines();
            let mut primary_title: Option<String> = None;
            let mut english_title: Option<String> = None;
            let mut alt_titles: HashMap<String, String> = HashMap::new();

            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(tuple) = serde_json::from_str::<serde_json::Value>(&line) else {
                    continue;
                };
                let Some(array) = tuple.as_array() else { continue };
                let Some(kind) = array.first().and_then(|v| v.as_str()) else { continue };

                match kind {
                    "manga" => {
                        if let Some(metadata) = array.get(2) {
                            if let Some(title) = metadata.get("title").and_then(|v| v.as_str()) {
                                if metadata.get("lang").and_then(|v| v.as_str()) == Some("en") {
                                    english_title = Some(title.to_string());
                                }
                                primary_title.get_or_insert_with(|| title.to_string());
                            }
                        }
                    }
                    "manga_alt" => {
                        if let Some(metadata) = array.get(2) {
                            if let Some(title) = metadata.get("title").and_then(|v| v.as_str()) {
                                let lang = detect_script_language(title);
                                alt_titles.insert(title.to_string(), lang.to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }

            let title = english_title.or(primary_title);
            (title, alt_titles)
        };

        let (title, alt_titles) = timeout(METADATA_TIMEOUT, run).await.map_err(|_| AppError::internal("metadata simulate timed out"))?;

        let _ = child.wait().await;

        let title = title.ok_or_else(|| AppError::internal("extractor produced no title"))?;

        Ok(MangaMetadata {
            id: url.to_string(),
            title,
            alternative_titles: alt_titles,
            ..Default::default()
        })
    }

    /// `downloadSingle(chapterUrl, destination, configFile)`.
    pub async fn download_single(&self, chapter_url: &str, destination: &Path, config_file: &Path) -> AppResult<ExtractorRunResult> {
        let mut command = self.base_command();
        command
            .arg(chapter_url)
            .arg("-d")
            .arg(destination)
            .arg("--config")
            .arg(config_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(AppError::internal)?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let logger = &self.logger;
        let read_streams = async {
            let mut stdout_lines = Vec::new();
            let mut stderr_lines = Vec::new();
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();

            loop {
                tokio::select! {
                    line = stdout_reader.next_line() => {
                        match line {
                            Ok(Some(line)) => push_bounded(&mut stdout_lines, line),
                            _ => break,
                        }
                    }
                    line = stderr_reader.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                logger.inform(&format!("extractor stderr: {line}"));
                                push_bounded(&mut stderr_lines, line);
                            }
                            _ => {}
                        }
                    }
                }
            }

            (stdout_lines, stderr_lines)
        };

        let wait_result = timeout(PER_CHAPTER_TIMEOUT, async {
            let (stdout_lines, stderr_lines) = read_streams.await;
            let status = child.wait().await;
            (status, stdout_lines, stderr_lines)
        })
        .await;

        match wait_result {
            Ok((status, stdout_lines, stderr_lines)) => {
                let status = status.map_err(AppError::internal)?;
                Ok(ExtractorRunResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: stdout_lines,
                    stderr: stderr_lines,
                    cancelled: false,
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(AppError::internal("extractor timed out downloading a single chapter"))
            }
        }
    }

    /// `downloadSeries(url, destination, libraryPath, isCancelled,
    /// onProcessStarted, onProgress)`.
    pub async fn download_series<F1, F2>(
        &self,
        url: &str,
        destination: &Path,
        config_file: &Path,
        mut is_cancelled: impl FnMut() -> bool,
        on_process_started: F1,
        mut on_progress: F2,
    ) -> AppResult<ExtractorRunResult>
    where
        F1: FnOnce(u32),
        F2: FnMut(u32, u32, u32, &str),
    {
        let mut command = self.base_command();
        command.arg(url).arg("-d").arg(destination).arg("--config").arg(config_file).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(AppError::internal)?;
        if let Some(pid) = child.id() {
            on_process_started(pid);
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let mut stderr_lines = Vec::new();
        let mut completed_files = 0u32;
        let mut last_percent: Option<u32> = None;
        let mut cancelled = false;

        let run = async {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(captures) = PROGRESS_LINE_RE.captures(&line) {
                    if let Ok(percent) = captures[1].parse::<u32>() {
                        let is_new_high = match last_percent {
                            Some(prev) => percent > prev,
                            None => true,
                        };
                        if is_new_high {
                            on_progress(percent, completed_files, 0, &line);
                            last_percent = Some(percent);
                        }
                    }
                }

                if line.contains("100%") {
                    completed_files += 1;
                }

                if is_cancelled() {
                    cancelled = true;
                    break;
                }
            }
        };

        let timed_out = timeout(PER_SERIES_TIMEOUT, run).await.is_err();

        if timed_out || cancelled {
            let _ = child.kill().await;
            if timed_out {
                return Err(AppError::internal("extractor timed out downloading a series"));
            }
            return Ok(ExtractorRunResult {
                exit_code: -1,
                stdout: vec![],
                stderr: stderr_lines,
                cancelled: true,
            });
        }

        let status = child.wait().await.map_err(AppError::internal)?;
        if !status.success() {
            self.logger.warn(&format!("extractor exited with {:?} downloading series {url}", status.code()));
        }

        stderr_lines.push(format!("exit code {:?}", status.code()));

        Ok(ExtractorRunResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: vec![],
            stderr: stderr_lines,
            cancelled: false,
        })
    }

    pub async fn is_installed(&self) -> bool {
        let mut command = self.base_command();
        command.arg("--version").stdout(Stdio::null()).stderr(Stdio::null());
        matches!(timeout(RESOLVE_PROBE_TIMEOUT, command.status()).await, Ok(Ok(status)) if status.success())
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.binary[0]);
        command.args(&self.binary[1..]);
        command
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_generates_deterministic_config_for_the_same_identity() {
        let identity = ExtractorIdentity {
            preferred_language: "en".to_string(),
            username: None,
            password: None,
        };

        assert_eq!(generate_config_file(&identity), generate_config_file(&identity));
        assert!(generate_config_file(&identity).contains("\"lang\": \"en\""));
    }

    #[test]
    fn it_includes_credentials_when_provided() {
        let identity = ExtractorIdentity {
            preferred_language: "en".to_string(),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        };

        let config = generate_config_file(&identity);
        assert!(config.contains("\"username\": \"user\""));
        assert!(config.contains("\"password\": \"pass\""));
    }

    #[test]
    fn it_detects_script_language_from_title_characters() {
        assert_eq!(detect_script_language("こんにちは"), "ja");
        assert_eq!(detect_script_language("안녕하세요"), "ko");
        assert_eq!(detect_script_language("你好"), "zh");
        assert_eq!(detect_script_language("Hello"), "unknown");
    }

    #[test]
    #[ignore]
    fn it_downloads_a_single_chapter_via_the_real_extractor_binary() {
        // Requires `gallery-dl` on PATH; exercised manually, not in CI.
    }
}
