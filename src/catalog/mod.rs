//! Catalog Client (C2): a typed wrapper over the upstream catalog's HTTP+JSON
//! surface (manga lookup, paged chapter feed, cover download).
//!
//! Grounded in the teacher's `src/backend/manga_provider/mangadex.rs` for
//! the query-string construction and relationship-walking style, and in
//! `src/backend/manga_provider.rs` for the "async-fn-in-trait returning a
//! boxed error" pluggable-provider shape — collapsed here to the single
//! catalog the spec names.

pub mod mangadex;

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::future::Future;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// Cover image resolution to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageQuality {
    Original,
    #[default]
    Medium,
    Thumbnail,
}

/// In-memory record returned by the catalog client (spec.md §3 `MangaMetadata`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MangaMetadata {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub publication_demographic: Option<String>,
    pub year: Option<u32>,
    pub status: Option<String>,
    pub genres: HashSet<String>,
    /// alternative title -> BCP-47-ish language code
    pub alternative_titles: HashMap<String, String>,
    pub cover_filename: Option<String>,
    pub latest_chapter: Option<String>,
}

/// `spec.md` §3 `ChapterDescriptor`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDescriptor {
    pub chapter_id: String,
    pub chapter_url: Option<String>,
    pub chapter_number: Option<f64>,
    pub volume: Option<u32>,
    pub title: String,
    pub language: String,
    pub pages: u32,
    pub scanlation_group: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
}

/// Paged slice of a chapter feed (spec.md §4.2 `getChapterFeed`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChapterFeedPage {
    pub chapters: Vec<ChapterDescriptor>,
    pub total: u32,
}

static MANGADEX_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)mangadex\.org/(?:title|manga)/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
        .expect("static regex is valid")
});

static MANGADEX_CHAPTER_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)mangadex\.org/chapter/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
        .expect("static regex is valid")
});

/// Extracts the manga UUID from a catalog URL, or `None` if it doesn't match.
pub fn extract_manga_id(url: &str) -> Option<Uuid> {
    let captured = MANGADEX_URL_RE.captures(url)?;
    Uuid::parse_str(&captured[1]).ok()
}

/// Extracts the chapter UUID from a catalog URL, or `None` if it doesn't match.
pub fn extract_chapter_id(url: &str) -> Option<Uuid> {
    let captured = MANGADEX_CHAPTER_URL_RE.captures(url)?;
    Uuid::parse_str(&captured[1]).ok()
}

pub type CatalogError = Box<dyn Error + Send + Sync>;

/// Everything the rest of the orchestrator needs from the upstream catalog.
///
/// Non-2xx and transport errors are non-fatal per spec.md §4.2: they surface
/// as `Ok(None)`/`Ok(vec![])`, not `Err`. `Err` is reserved for programmer
/// errors (malformed request construction) and is not expected in practice.
pub trait CatalogClient: Send + Sync {
    fn get_manga(&self, manga_id: &str) -> impl Future<Output = Result<Option<MangaMetadata>, CatalogError>> + Send;

    fn get_chapter_feed(
        &self,
        manga_id: &str,
        lang: &str,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<ChapterFeedPage, CatalogError>> + Send;

    fn get_all_chapters(
        &self,
        manga_id: &str,
        lang: &str,
    ) -> impl Future<Output = Result<Vec<ChapterDescriptor>, CatalogError>> + Send;

    fn get_chapter(&self, chapter_id: &str) -> impl Future<Output = Result<Option<ChapterDescriptor>, CatalogError>> + Send;

    fn search_manga(&self, query: &str, limit: u32) -> impl Future<Output = Result<Vec<MangaMetadata>, CatalogError>> + Send;

    fn download_cover(
        &self,
        manga_id: &str,
        cover_filename: &str,
        quality: ImageQuality,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, CatalogError>> + Send;

    /// Count of translated chapters for a manga/language, used by the
    /// Chapter Checker's cheap "new chapters" estimate (spec.md §4.7).
    fn count_translated_chapters(
        &self,
        manga_id: &str,
        lang: &str,
    ) -> impl Future<Output = Result<u32, CatalogError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_extracts_manga_id_from_a_title_url() {
        let url = "https://mangadex.org/title/a1b2c3d4-e5f6-4789-a012-3456789abcde/some-manga";
        let id = extract_manga_id(url).unwrap();
        assert_eq!(id.to_string(), "a1b2c3d4-e5f6-4789-a012-3456789abcde");
    }

    #[test]
    fn it_returns_none_for_a_non_catalog_url() {
        assert!(extract_manga_id("https://example.com/not-a-manga-url").is_none());
    }

    #[test]
    fn it_extracts_chapter_id_from_a_chapter_url() {
        let url = "https://mangadex.org/chapter/a1b2c3d4-e5f6-4789-a012-3456789abcde";
        let id = extract_chapter_id(url).unwrap();
        assert_eq!(id.to_string(), "a1b2c3d4-e5f6-4789-a012-3456789abcde");
    }
}
