//! Trakt カタログ API クライアント。
//!
//! trending / popular などのリスト endpoint を `extended=full` で取得し、
//! 評価・投票数・watchers を品質シグナルとして取り込む。trending 形式の
//! ラッパー付きエントリとメディア直下のエントリの両方を受け付ける。

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::clients::{
    CatalogPage, ExternalIds, ProviderError, RawItem, check_status, headers, join_endpoint,
    parse_base_url,
};
use crate::model::QualitySignal;
use crate::store::files;

const PROVIDER: &str = "trakt";

/// Trakt クライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct TraktConfig {
    pub(crate) base_url: String,
    pub(crate) client_id: String,
    pub(crate) access_token: Option<String>,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
    pub(crate) page_limit: u32,
}

/// OAuth デバイスフローで得たトークンのファイル表現。
///
/// ファイルが無ければ匿名アクセスとして扱う。公開リストの取得には
/// client id だけで足りる。
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TraktTokens {
    #[serde(default)]
    pub(crate) access_token: Option<String>,
}

impl TraktTokens {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        Ok(files::read_json(path)?.unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TraktClient {
    client: Client,
    base_url: Url,
    page_limit: u32,
}

impl TraktClient {
    pub(crate) fn new(config: &TraktConfig) -> Result<Self> {
        let default_headers =
            headers::trakt_headers(&config.client_id, config.access_token.as_deref())?;
        let client = Client::builder()
            .user_agent(headers::USER_AGENT_VALUE)
            .default_headers(default_headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build trakt HTTP client")?;
        let base_url = parse_base_url(&config.base_url).context("invalid trakt base URL")?;
        Ok(Self {
            client,
            base_url,
            page_limit: config.page_limit,
        })
    }

    /// 指定パスのカタログを 1 ページ取得する。
    pub(crate) async fn fetch_catalog_page(
        &self,
        path: &str,
        page: u32,
    ) -> Result<CatalogPage, ProviderError> {
        let mut url = join_endpoint(PROVIDER, &self.base_url, path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &page.to_string());
            query.append_pair("limit", &self.page_limit.to_string());
            query.append_pair("extended", "full");
        }
        debug!(%url, page, "fetching trakt catalog page");

        let response = self.client.get(url).send().await.map_err(|source| {
            ProviderError::Transport {
                provider: PROVIDER,
                source,
            }
        })?;
        let response = check_status(PROVIDER, response)?;
        let page_count = pagination_page_count(&response);
        let entries: Vec<TraktEntry> =
            response
                .json()
                .await
                .map_err(|source| ProviderError::Decode {
                    provider: PROVIDER,
                    source,
                })?;

        let fetched = entries.len();
        let items: Vec<RawItem> = entries
            .into_iter()
            .map(TraktEntry::into_raw_item)
            .collect();
        let has_more = match page_count {
            Some(total_pages) => page < total_pages,
            // ヘッダーが無い endpoint では満杯ページを継続ページとみなす
            None => fetched > 0 && fetched >= self.page_limit as usize,
        };
        debug!(fetched, has_more, "trakt page decoded");
        Ok(CatalogPage { items, has_more })
    }
}

/// trending 系 endpoint が返す `X-Pagination-Page-Count` ヘッダー。
fn pagination_page_count(response: &reqwest::Response) -> Option<u32> {
    response
        .headers()
        .get("x-pagination-page-count")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// trending 形式（`{"watchers": N, "movie": {..}}` または `"show"`）と
/// popular 形式（メディアが直下に展開）の両対応エントリ。
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TraktEntry {
    Wrapped {
        watchers: Option<u64>,
        #[serde(alias = "show")]
        movie: TraktMedia,
    },
    Bare(TraktMedia),
}

impl TraktEntry {
    #[allow(clippy::cast_precision_loss)]
    fn into_raw_item(self) -> RawItem {
        let (watchers, media) = match self {
            Self::Wrapped { watchers, movie } => (watchers, movie),
            Self::Bare(media) => (None, media),
        };
        RawItem {
            title: media.title,
            year: media.year,
            genres: media.genres,
            quality: QualitySignal {
                // Trakt は未評価を rating 0 / votes 0 で返す
                rating: media.rating.filter(|rating| *rating > 0.0),
                votes: media.votes.unwrap_or(0),
                popularity: watchers.map_or(0.0, |count| count as f64),
            },
            ids: ExternalIds {
                imdb: media.ids.imdb.filter(|id| !id.is_empty()),
                tmdb: media.ids.tmdb,
                trakt: media.ids.trakt,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TraktMedia {
    title: String,
    year: Option<i32>,
    ids: TraktMediaIds,
    rating: Option<f64>,
    votes: Option<u64>,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TraktMediaIds {
    trakt: Option<u64>,
    imdb: Option<String>,
    tmdb: Option<u64>,
}
