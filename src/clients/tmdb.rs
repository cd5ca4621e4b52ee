//! TMDB カタログ API クライアント。
//!
//! discover / trending 系のカタログ取得に加えて、IMDB ID との相互解決
//! (`/external_ids`, `/find`) を提供する。API キーはクエリパラメータで
//! 渡すため、組み立て後の URL はログに出さない。

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::clients::{
    CatalogPage, ExternalIds, ProviderError, RawItem, check_status, headers, join_endpoint,
    parse_base_url,
};
use crate::model::{MediaKind, QualitySignal};

const PROVIDER: &str = "tmdb";

/// TMDB クライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct TmdbConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct TmdbClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl TmdbClient {
    pub(crate) fn new(config: &TmdbConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(headers::USER_AGENT_VALUE)
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build tmdb HTTP client")?;
        let base_url = parse_base_url(&config.base_url).context("invalid tmdb base URL")?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// 指定パスのカタログを 1 ページ取得する。
    pub(crate) async fn fetch_catalog_page(
        &self,
        path: &str,
        kind: MediaKind,
        page: u32,
    ) -> Result<CatalogPage, ProviderError> {
        let mut url = join_endpoint(PROVIDER, &self.base_url, path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.api_key);
            query.append_pair("page", &page.to_string());
        }
        debug!(path, page, "fetching tmdb catalog page");

        let body: TmdbPage = self.get_json(url).await?;
        let has_more = body.total_pages.is_some_and(|total| page < total);
        let items: Vec<RawItem> = body
            .results
            .into_iter()
            .filter_map(|entry| entry.into_raw_item(kind))
            .collect();
        debug!(kept = items.len(), has_more, "tmdb page decoded");
        Ok(CatalogPage { items, has_more })
    }

    /// TMDB ID から IMDB ID を引く。未登録の作品は `Ok(None)`。
    pub(crate) async fn external_imdb_id(
        &self,
        kind: MediaKind,
        tmdb_id: u64,
    ) -> Result<Option<String>, ProviderError> {
        let segment = format!("{}/{tmdb_id}/external_ids", kind_segment(kind));
        let mut url = join_endpoint(PROVIDER, &self.base_url, &segment)?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        debug!(kind = kind.as_str(), tmdb_id, "resolving imdb id via tmdb");

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| ProviderError::Transport {
                    provider: PROVIDER,
                    source,
                })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(PROVIDER, response)?;
        let body: TmdbExternalIds =
            response
                .json()
                .await
                .map_err(|source| ProviderError::Decode {
                    provider: PROVIDER,
                    source,
                })?;
        Ok(body.imdb_id.filter(|id| !id.is_empty()))
    }

    /// IMDB ID で引き当てた作品の品質シグナルを返す。
    pub(crate) async fn find_by_imdb(
        &self,
        kind: MediaKind,
        imdb_id: &str,
    ) -> Result<Option<QualitySignal>, ProviderError> {
        let segment = format!("find/{imdb_id}");
        let mut url = join_endpoint(PROVIDER, &self.base_url, &segment)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.api_key);
            query.append_pair("external_source", "imdb_id");
        }
        debug!(kind = kind.as_str(), imdb_id, "looking up quality via tmdb find");

        let body: TmdbFindResponse = self.get_json(url).await?;
        let results = match kind {
            MediaKind::Movie => body.movie_results,
            MediaKind::Series => body.tv_results,
        };
        Ok(results.into_iter().next().map(|entry| entry.quality()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| ProviderError::Transport {
                    provider: PROVIDER,
                    source,
                })?;
        let response = check_status(PROVIDER, response)?;
        response
            .json()
            .await
            .map_err(|source| ProviderError::Decode {
                provider: PROVIDER,
                source,
            })
    }
}

fn kind_segment(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Movie => "movie",
        MediaKind::Series => "tv",
    }
}

/// TMDB のジャンル ID を Trakt と揃えたスラッグへ写像する。
///
/// メディア種別でテーブルが異なる。未知の ID は落とす。
fn genre_slug(kind: MediaKind, id: u64) -> Option<&'static str> {
    let slug = match (kind, id) {
        (_, 16) => "animation",
        (_, 18) => "drama",
        (_, 35) => "comedy",
        (_, 37) => "western",
        (_, 80) => "crime",
        (_, 99) => "documentary",
        (_, 9648) => "mystery",
        (_, 10751) => "family",
        (MediaKind::Movie, 12) => "adventure",
        (MediaKind::Movie, 14) => "fantasy",
        (MediaKind::Movie, 27) => "horror",
        (MediaKind::Movie, 28) => "action",
        (MediaKind::Movie, 36) => "history",
        (MediaKind::Movie, 53) => "thriller",
        (MediaKind::Movie, 878) => "science-fiction",
        (MediaKind::Movie, 10402) => "music",
        (MediaKind::Movie, 10749) => "romance",
        (MediaKind::Movie, 10752) => "war",
        (MediaKind::Movie, 10770) => "tv-movie",
        (MediaKind::Series, 10759) => "action",
        (MediaKind::Series, 10762) => "kids",
        (MediaKind::Series, 10763) => "news",
        (MediaKind::Series, 10764) => "reality",
        (MediaKind::Series, 10765) => "science-fiction",
        (MediaKind::Series, 10766) => "soap",
        (MediaKind::Series, 10767) => "talk",
        (MediaKind::Series, 10768) => "war",
        _ => return None,
    };
    Some(slug)
}

/// `YYYY-MM-DD` 形式の日付文字列から年を取り出す。
fn parse_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct TmdbPage {
    total_pages: Option<u32>,
    #[serde(default)]
    results: Vec<TmdbEntry>,
}

#[derive(Debug, Deserialize)]
struct TmdbEntry {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    #[serde(default)]
    genre_ids: Vec<u64>,
    vote_average: Option<f64>,
    vote_count: Option<u64>,
    popularity: Option<f64>,
}

impl TmdbEntry {
    fn into_raw_item(self, kind: MediaKind) -> Option<RawItem> {
        let quality = self.quality();
        let year = self
            .release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .and_then(parse_year);
        let genres = self
            .genre_ids
            .iter()
            .filter_map(|&id| genre_slug(kind, id))
            .map(str::to_string)
            .collect();
        let tmdb_id = self.id;
        let title = self.title.or(self.name)?;
        Some(RawItem {
            title,
            year,
            genres,
            quality,
            ids: ExternalIds {
                imdb: None,
                tmdb: Some(tmdb_id),
                trakt: None,
            },
        })
    }

    fn quality(&self) -> QualitySignal {
        QualitySignal {
            rating: self.vote_average.filter(|rating| *rating > 0.0),
            votes: self.vote_count.unwrap_or(0),
            popularity: self.popularity.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TmdbExternalIds {
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    movie_results: Vec<TmdbEntry>,
    #[serde(default)]
    tv_results: Vec<TmdbEntry>,
}
