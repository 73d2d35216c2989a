//! MangaDex implementation of [`CatalogClient`].
//!
//! Query construction and relationship traversal are adapted from the
//! teacher's `src/backend/manga_provider/mangadex.rs`; this module keeps only
//! the operations spec.md §4.2 names and drops everything tied to the TUI
//! (filters widgets, reader-page fetching, tag/author search for a filter
//! UI).

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{CatalogClient, CatalogError, ChapterDescriptor, ChapterFeedPage, ImageQuality, MangaMetadata};
use crate::logger::ILogger;
use crate::rate_limiter::RateLimiter;

pub static API_URL_BASE: &str = "https://api.mangadex.org";
pub static COVER_IMG_URL_BASE: &str = "https://uploads.mangadex.org/covers";
pub static USER_AGENT: &str = concat!("komga-dl-orchestrator/", env!("CARGO_PKG_VERSION"));

const AGGREGATE_PAGE_SIZE: u32 = 100;

pub struct Mangadex<L: ILogger> {
    client: Client,
    api_url_base: Url,
    cover_img_url_base: Url,
    preferred_language: String,
    rate_limiter: RateLimiter,
    logger: L,
}

impl<L: ILogger> Mangadex<L> {
    pub fn new(api_url_base: Url, cover_img_url_base: Url, rate_limiter: RateLimiter, logger: L) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("building the reqwest client with static config never fails");

        Self {
            client,
            api_url_base,
            cover_img_url_base,
            preferred_language: "en".to_string(),
            rate_limiter,
            logger,
        }
    }

    pub fn with_preferred_language(mut self, lang: impl Into<String>) -> Self {
        self.preferred_language = lang.into();
        self
    }

    fn pick_localized(&self, map: &HashMap<String, String>) -> Option<String> {
        map.get(&self.preferred_language).or_else(|| map.get("en")).or_else(|| map.values().next()).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct AltTitleEntry(#[serde(default)] HashMap<String, String>);

#[derive(Debug, Deserialize)]
struct TagAttributes {
    name: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    attributes: TagAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: HashMap<String, String>,
    #[serde(default, rename = "altTitles")]
    alt_titles: Vec<AltTitleEntry>,
    #[serde(default)]
    description: HashMap<String, String>,
    status: Option<String>,
    year: Option<u32>,
    #[serde(rename = "publicationDemographic")]
    publication_demographic: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "fileName")]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    type_field: String,
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaResponse {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct SearchMangaResponse {
    data: Vec<MangaData>,
    total: u32,
}

fn manga_data_into_metadata<L: ILogger>(client: &Mangadex<L>, manga: MangaData) -> MangaMetadata {
    let title = manga
        .attributes
        .alt_titles
        .iter()
        .find_map(|entry| entry.0.get(&client.preferred_language).cloned())
        .or_else(|| client.pick_localized(&manga.attributes.title))
        .unwrap_or_else(|| "Unknown title".to_string());

    let mut alternative_titles = HashMap::new();
    for entry in &manga.attributes.alt_titles {
        for (lang, title) in &entry.0 {
            alternative_titles.entry(title.clone()).or_insert_with(|| lang.clone());
        }
    }

    let description = client.pick_localized(&manga.attributes.description);

    let genres: HashSet<String> = manga
        .attributes
        .tags
        .iter()
        .filter_map(|tag| tag.attributes.name.get("en").cloned())
        .collect();

    let author = manga
        .relationships
        .iter()
        .find(|rel| rel.type_field == "author")
        .and_then(|rel| rel.attributes.as_ref())
        .and_then(|attrs| attrs.name.clone());

    let artist = manga
        .relationships
        .iter()
        .find(|rel| rel.type_field == "artist")
        .and_then(|rel| rel.attributes.as_ref())
        .and_then(|attrs| attrs.name.clone());

    let cover_filename = manga
        .relationships
        .iter()
        .find(|rel| rel.type_field == "cover_art")
        .and_then(|rel| rel.attributes.as_ref())
        .and_then(|attrs| attrs.file_name.clone());

    MangaMetadata {
        id: manga.id,
        title,
        description,
        author,
        artist,
        publication_demographic: manga.attributes.publication_demographic,
        year: manga.attributes.year,
        status: manga.attributes.status,
        genres,
        alternative_titles,
        cover_filename,
        latest_chapter: None,
    }
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    title: Option<String>,
    volume: Option<String>,
    chapter: Option<String>,
    #[serde(rename = "translatedLanguage")]
    translated_language: String,
    pages: u32,
    #[serde(rename = "publishAt")]
    publish_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct ChapterFeedResponse {
    data: Vec<ChapterData>,
    total: u32,
}

#[derive(Debug, Deserialize)]
struct OneChapterResponse {
    data: ChapterData,
}

fn chapter_data_into_descriptor(chapter: ChapterData) -> ChapterDescriptor {
    let scanlation_group = chapter
        .relationships
        .iter()
        .find(|rel| rel.type_field == "scanlation_group")
        .and_then(|rel| rel.attributes.as_ref())
        .and_then(|attrs| attrs.name.clone());

    let chapter_url = Some(format!("https://mangadex.org/chapter/{}", chapter.id));

    ChapterDescriptor {
        chapter_id: chapter.id,
        chapter_url,
        chapter_number: chapter.attributes.chapter.as_deref().and_then(|n| n.parse().ok()),
        volume: chapter.attributes.volume.as_deref().and_then(|v| v.parse().ok()),
        title: chapter.attributes.title.unwrap_or_else(|| "No title".to_string()),
        language: chapter.attributes.translated_language,
        pages: chapter.attributes.pages,
        scanlation_group,
        publish_date: chapter.attributes.publish_at,
    }
}

#[derive(Debug, Deserialize)]
struct AggregateChapter {
    #[allow(dead_code)]
    chapter: String,
}

#[derive(Debug, Deserialize)]
struct AggregateVolume {
    #[serde(default)]
    chapters: HashMap<String, AggregateChapter>,
}

#[derive(Debug, Deserialize, Default)]
struct AggregateResponse {
    #[serde(default)]
    volumes: HashMap<String, AggregateVolume>,
}

impl<L: ILogger + Send + Sync> CatalogClient for Mangadex<L> {
    async fn get_manga(&self, manga_id: &str) -> Result<Option<MangaMetadata>, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let endpoint = format!("{}/manga/{manga_id}?includes[]=cover_art&includes[]=author&includes[]=artist", self.api_url_base);

        let response = match self.client.get(endpoint).send().await {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error fetching manga {manga_id}: {err}"));
                return Ok(None);
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx fetching manga {manga_id}: {}", response.status()));
            return Ok(None);
        }

        let parsed: MangaResponse = response.json().await.map_err(box_err)?;

        Ok(Some(manga_data_into_metadata(self, parsed.data)))
    }

    async fn get_chapter_feed(
        &self,
        manga_id: &str,
        lang: &str,
        limit: u32,
        offset: u32,
    ) -> Result<ChapterFeedPage, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let endpoint = format!("{}/manga/{manga_id}/feed", self.api_url_base);

        let response = match self
            .client
            .get(endpoint)
            .query(&[
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
                ("translatedLanguage[]", lang.to_string()),
                ("order[volume]", "asc".to_string()),
                ("order[chapter]", "asc".to_string()),
                ("includes[]", "scanlation_group".to_string()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error fetching chapter feed for {manga_id}: {err}"));
                return Ok(ChapterFeedPage::default());
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx fetching chapter feed for {manga_id}: {}", response.status()));
            return Ok(ChapterFeedPage::default());
        }

        let parsed: ChapterFeedResponse = response.json().await.map_err(box_err)?;
        let total = parsed.total;

        Ok(ChapterFeedPage {
            chapters: parsed.data.into_iter().map(chapter_data_into_descriptor).collect(),
            total,
        })
    }

    async fn get_all_chapters(&self, manga_id: &str, lang: &str) -> Result<Vec<ChapterDescriptor>, CatalogError> {
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.get_chapter_feed(manga_id, lang, AGGREGATE_PAGE_SIZE, offset).await?;
            let page_len = page.chapters.len() as u32;

            all.extend(page.chapters);

            if page_len < AGGREGATE_PAGE_SIZE {
                break;
            }

            offset += AGGREGATE_PAGE_SIZE;
        }

        Ok(all)
    }

    async fn get_chapter(&self, chapter_id: &str) -> Result<Option<ChapterDescriptor>, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let endpoint = format!("{}/chapter/{chapter_id}?includes[]=scanlation_group", self.api_url_base);

        let response = match self.client.get(endpoint).send().await {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error fetching chapter {chapter_id}: {err}"));
                return Ok(None);
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx fetching chapter {chapter_id}: {}", response.status()));
            return Ok(None);
        }

        let parsed: OneChapterResponse = response.json().await.map_err(box_err)?;

        Ok(Some(chapter_data_into_descriptor(parsed.data)))
    }

    async fn search_manga(&self, query: &str, limit: u32) -> Result<Vec<MangaMetadata>, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let endpoint = format!("{}/manga", self.api_url_base);

        let response = match self
            .client
            .get(endpoint)
            .query(&[
                ("title", query.to_string()),
                ("limit", limit.to_string()),
                ("includes[]", "cover_art".to_string()),
                ("includes[]", "author".to_string()),
                ("includes[]", "artist".to_string()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error searching manga {query:?}: {err}"));
                return Ok(vec![]);
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx searching manga {query:?}: {}", response.status()));
            return Ok(vec![]);
        }

        let parsed: SearchMangaResponse = response.json().await.map_err(box_err)?;

        Ok(parsed.data.into_iter().map(|data| manga_data_into_metadata(self, data)).collect())
    }

    async fn download_cover(
        &self,
        manga_id: &str,
        cover_filename: &str,
        quality: ImageQuality,
    ) -> Result<Option<Vec<u8>>, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let suffix = match quality {
            ImageQuality::Original => "",
            ImageQuality::Medium => ".512.jpg",
            ImageQuality::Thumbnail => ".256.jpg",
        };

        let endpoint = format!("{}/{manga_id}/{cover_filename}{suffix}", self.cover_img_url_base);

        let response = match self.client.get(endpoint).send().await {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error downloading cover for {manga_id}: {err}"));
                return Ok(None);
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx downloading cover for {manga_id}: {}", response.status()));
            return Ok(None);
        }

        let bytes = response.bytes().await.map_err(box_err)?;

        Ok(Some(bytes.to_vec()))
    }

    async fn count_translated_chapters(&self, manga_id: &str, lang: &str) -> Result<u32, CatalogError> {
        self.rate_limiter.wait_if_needed().await;

        let endpoint = format!("{}/manga/{manga_id}/aggregate?translatedLanguage[]={lang}", self.api_url_base);

        let response = match self.client.get(endpoint).send().await {
            Ok(response) => response,
            Err(err) => {
                self.logger.warn(format!("transport error fetching aggregate for {manga_id}: {err}"));
                return Ok(0);
            },
        };

        if response.status() != StatusCode::OK {
            self.logger.warn(format!("non-2xx fetching aggregate for {manga_id}: {}", response.status()));
            return Ok(0);
        }

        let parsed: AggregateResponse = response.json().await.unwrap_or_default();

        Ok(parsed.volumes.values().map(|volume| volume.chapters.len() as u32).sum())
    }
}

fn box_err(err: reqwest::Error) -> CatalogError {
    Box::new(err)
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::logger::DefaultLogger;

    fn make_client(server: &MockServer) -> Mangadex<DefaultLogger> {
        Mangadex::new(
            server.base_url().parse().unwrap(),
            format!("{}/covers", server.base_url()).parse().unwrap(),
            RateLimiter::new(100, 1000),
            DefaultLogger,
        )
    }

    #[tokio::test]
    async fn it_gets_a_manga_preferring_the_preferred_language_title() {
        let server = MockServer::start_async().await;
        let client = make_client(&server).with_preferred_language("es");

        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/manga/manga-id");
                then.status(200).json_body(json!({
                    "data": {
                        "id": "manga-id",
                        "attributes": {
                            "title": {"en": "English Title", "es": "Titulo en espanol"},
                            "altTitles": [{"ja": "Japanese Title"}],
                            "description": {"en": "desc"},
                            "status": "ongoing",
                            "year": 2020,
                            "publicationDemographic": "shounen",
                            "tags": [{"attributes": {"name": {"en": "Action"}}}]
                        },
                        "relationships": [
                            {"type": "author", "attributes": {"name": "Some Author"}},
                            {"type": "cover_art", "attributes": {"fileName": "cover.png"}}
                        ]
                    }
                }));
            })
            .await;

        let manga = client.get_manga("manga-id").await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(manga.title, "Titulo en espanol");
        assert_eq!(manga.author.as_deref(), Some("Some Author"));
        assert_eq!(manga.cover_filename.as_deref(), Some("cover.png"));
        assert_eq!(manga.alternative_titles.get("Japanese Title"), Some(&"ja".to_string()));
        assert!(manga.genres.contains("Action"));
    }

    #[tokio::test]
    async fn it_returns_none_on_a_non_2xx_response() {
        let server = MockServer::start_async().await;
        let client = make_client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/manga/missing");
                then.status(404);
            })
            .await;

        let manga = client.get_manga("missing").await.unwrap();
        assert!(manga.is_none());
    }

    #[tokio::test]
    async fn it_paginates_get_all_chapters_until_a_short_page() {
        let server = MockServer::start_async().await;
        let client = make_client(&server);

        fn chapter_json(n: u32) -> serde_json::Value {
            json!({
                "id": format!("chapter-{n}"),
                "attributes": {
                    "title": "t", "volume": null, "chapter": n.to_string(),
                    "translatedLanguage": "en", "pages": 5, "publishAt": null
                },
                "relationships": []
            })
        }

        let first_page: Vec<_> = (0..100).map(chapter_json).collect();
        let second_page: Vec<_> = (100..130).map(chapter_json).collect();

        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/feed").query_param("offset", "0");
                then.status(200).json_body(json!({"data": first_page, "total": 130}));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/feed").query_param("offset", "100");
                then.status(200).json_body(json!({"data": second_page, "total": 130}));
            })
            .await;

        let chapters = client.get_all_chapters("manga-id", "en").await.unwrap();
        assert_eq!(chapters.len(), 130);
    }

    #[tokio::test]
    async fn it_counts_translated_chapters_across_all_volumes() {
        let server = MockServer::start_async().await;
        let client = make_client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/aggregate");
                then.status(200).json_body(json!({
                    "volumes": {
                        "1": {"chapters": {"1": {"chapter": "1"}, "2": {"chapter": "2"}}},
                        "2": {"chapters": {"3": {"chapter": "3"}}}
                    }
                }));
            })
            .await;

        let count = client.count_translated_chapters("manga-id", "en").await.unwrap();
        assert_eq!(count, 3);
    }
}
