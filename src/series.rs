//! Series Materializer (C5): writes `series.json` and the cover image into a
//! download's destination directory, and sanitizes folder/file names.
//!
//! `sanitize_folder_name` generalizes the teacher's `SanitizedFilename` type
//! (referenced from `src/backend/manga_downloader.rs`, whose directory/name
//! builders this module's callers in the executor mirror) to the exact
//! character set spec.md names.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::catalog::{CatalogClient, MangaMetadata};
use crate::error::AppResult;
use crate::logger::ILogger;

const RICH_METADATA_MIN_BYTES: u64 = 5 * 1024;

#[derive(Debug, Serialize)]
struct AlternateTitle {
    title: String,
    language: String,
}

#[derive(Debug, Serialize)]
struct SeriesMetadata {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    alternate_titles: Vec<AlternateTitle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    publication_demographic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    genres: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct SeriesJson {
    metadata: SeriesMetadata,
}

/// Writes `{destination}/series.json`. Never fails the caller's download on
/// account of the "rich metadata" size check — it only logs a WARN.
pub fn write_series_json(manga: &MangaMetadata, destination: &Path, logger: &impl ILogger) -> AppResult<()> {
    let mut alternate_titles: Vec<AlternateTitle> = manga
        .alternative_titles
        .iter()
        .map(|(title, language)| AlternateTitle {
            title: title.clone(),
            language: language.clone(),
        })
        .collect();
    alternate_titles.sort_by(|a, b| (&a.title, &a.language).cmp(&(&b.title, &b.language)));

    let genres = if manga.genres.is_empty() {
        None
    } else {
        let mut genres: Vec<String> = manga.genres.iter().cloned().collect();
        genres.sort();
        Some(genres)
    };

    let document = SeriesJson {
        metadata: SeriesMetadata {
            kind: "comicSeries",
            name: manga.title.clone(),
            alternate_titles,
            author: manga.author.clone(),
            description: manga.description.clone(),
            year: manga.year,
            status: manga.status.clone(),
            publication_demographic: manga.publication_demographic.clone(),
            genres,
        },
    };

    let body = serde_json::to_vec_pretty(&document).map_err(|err| crate::error::AppError::internal(err))?;

    fs::create_dir_all(destination).map_err(|err| crate::error::AppError::internal(err))?;
    let path = destination.join("series.json");
    fs::write(&path, &body).map_err(|err| crate::error::AppError::internal(err))?;

    if (body.len() as u64) < RICH_METADATA_MIN_BYTES {
        logger.warn(&format!(
            "series.json for {:?} is only {} bytes, below the {RICH_METADATA_MIN_BYTES}-byte rich-metadata threshold",
            path,
            body.len()
        ));
    }

    Ok(())
}

/// Downloads and writes `{destination}/cover.{ext}`. Failure is logged and
/// swallowed — a missing cover must never fail the overall download.
pub async fn write_cover<C: CatalogClient>(
    catalog: &C,
    manga_id: &str,
    cover_filename: &str,
    destination: &Path,
    logger: &impl ILogger,
) {
    let result = catalog.download_cover(manga_id, cover_filename, crate::catalog::ImageQuality::Medium).await;

    let bytes = match result {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            logger.warn(&format!("no cover available for manga {manga_id}"));
            return;
        }
        Err(err) => {
            logger.error(err.as_ref());
            return;
        }
    };

    let ext = Path::new(cover_filename).extension().and_then(|ext| ext.to_str()).unwrap_or("jpg");

    if let Err(err) = fs::create_dir_all(destination) {
        logger.error(&err);
        return;
    }

    if let Err(err) = fs::write(destination.join(format!("cover.{ext}")), bytes) {
        logger.error(&err);
    }
}

/// Replaces any of `\ / : * ? " < > |` with a single space, collapses
/// whitespace, trims, and maps an empty result to `"Unknown"`.
pub fn sanitize_folder_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if "\\/:*?\"<>|".contains(c) { ' ' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::logger::DefaultLogger;

    #[test]
    fn it_sanitizes_forbidden_characters_to_spaces() {
        assert_eq!(sanitize_folder_name("Naruto: Part 1 / Volume \"2\""), "Naruto Part 1 Volume 2");
    }

    #[test]
    fn it_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_folder_name("  One   Piece  "), "One Piece");
    }

    #[test]
    fn it_maps_an_all_forbidden_name_to_unknown() {
        assert_eq!(sanitize_folder_name("///???"), "Unknown");
    }

    #[test]
    fn it_is_idempotent() {
        let once = sanitize_folder_name("Spy x Family: Code: White");
        let twice = sanitize_folder_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn it_writes_series_json_with_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut alt_titles = HashMap::new();
        alt_titles.insert("Spy Family".to_string(), "en".to_string());

        let manga = MangaMetadata {
            id: "manga-id".to_string(),
            title: "Spy x Family".to_string(),
            description: Some("A spy, an assassin, and a telepath walk into a family.".to_string()),
            author: Some("Tatsuya Endo".to_string()),
            artist: Some("Tatsuya Endo".to_string()),
            publication_demographic: Some("shounen".to_string()),
            year: Some(2019),
            status: Some("ongoing".to_string()),
            genres: ["Action".to_string(), "Comedy".to_string()].into_iter().collect(),
            alternative_titles: alt_titles,
            cover_filename: Some("cover.jpg".to_string()),
            latest_chapter: None,
        };

        write_series_json(&manga, dir.path(), &DefaultLogger).unwrap();

        let contents = fs::read_to_string(dir.path().join("series.json")).unwrap();
        assert!(contents.contains("\"type\": \"comicSeries\""));
        assert!(contents.contains("Spy x Family"));
    }
}
