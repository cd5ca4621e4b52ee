//! 外部カタログプロバイダのクライアント群。
//!
//! 各クライアントはページ単位の取得結果を [`CatalogPage`] に正規化して返す。
//! プロバイダ固有のエラーは [`ProviderError`] に分類し、リトライ層が
//! `kind()` で扱いを判断できるようにする。

pub(crate) mod headers;
pub(crate) mod tmdb;
pub(crate) mod trakt;

pub(crate) use tmdb::{TmdbClient, TmdbConfig};
pub(crate) use trakt::{TraktClient, TraktConfig, TraktTokens};

use std::time::Duration;

use anyhow::Context;
use reqwest::{Response, StatusCode, Url};
use thiserror::Error;

use crate::model::QualitySignal;
use crate::util::error::ErrorKind;

/// プロバイダ呼び出しの失敗分類。
#[derive(Debug, Error)]
pub(crate) enum ProviderError {
    /// 認証情報が拒否された。リトライしても回復しない。
    #[error("{provider} rejected credentials with status {status}")]
    Auth {
        provider: &'static str,
        status: StatusCode,
    },
    /// 成功以外の HTTP ステータス。
    #[error("{provider} returned status {status}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    /// 接続やタイムアウトなどの転送層の失敗。
    #[error("{provider} request failed")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// レスポンスボディのデコード失敗。
    #[error("{provider} response could not be decoded")]
    Decode {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// 設定されたソースパスから有効な URL を組み立てられない。
    #[error("{provider} source path {path:?} is not a valid endpoint")]
    InvalidPath {
        provider: &'static str,
        path: String,
    },
}

impl ProviderError {
    #[must_use]
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Fatal,
            Self::Status { status, .. } => {
                if status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                {
                    ErrorKind::Retryable
                } else {
                    ErrorKind::NonRetryable
                }
            }
            Self::Transport { source, .. } => {
                if source.is_builder() {
                    ErrorKind::NonRetryable
                } else {
                    ErrorKind::Retryable
                }
            }
            Self::Decode { .. } | Self::InvalidPath { .. } => ErrorKind::NonRetryable,
        }
    }

    /// サーバが `Retry-After` を返した場合の待機ヒント。
    #[must_use]
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// ステータスコードを検査し、成功レスポンスのみ通す。
pub(crate) fn check_status(
    provider: &'static str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth { provider, status });
    }
    if !status.is_success() {
        let retry_after = headers::retry_after(&response);
        return Err(ProviderError::Status {
            provider,
            status,
            retry_after,
        });
    }
    Ok(response)
}

/// 末尾スラッシュを保証して base URL を解析する。
///
/// スラッシュが無いと相対結合で最後のパスセグメントが失われる
/// (`/3` + `discover/movie` が `/discover/movie` になる)。
pub(crate) fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let parsed = if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    };
    parsed.with_context(|| format!("invalid base URL: {raw}"))
}

/// リスト定義のソースパスを base URL に結合する。
///
/// base と異なるホストへ解決されるパスは設定ミスとして拒否する。
pub(crate) fn join_endpoint(
    provider: &'static str,
    base: &Url,
    path: &str,
) -> Result<Url, ProviderError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(ProviderError::InvalidPath {
            provider,
            path: path.to_string(),
        });
    }
    let url = base.join(trimmed).map_err(|_| ProviderError::InvalidPath {
        provider,
        path: path.to_string(),
    })?;
    if url.host_str() != base.host_str() {
        return Err(ProviderError::InvalidPath {
            provider,
            path: path.to_string(),
        });
    }
    Ok(url)
}

/// プロバイダ横断の外部 ID セット。正準 ID の解決に使う。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExternalIds {
    pub(crate) imdb: Option<String>,
    pub(crate) tmdb: Option<u64>,
    pub(crate) trakt: Option<u64>,
}

/// 取得直後のカタログ項目。正準 ID 解決前の形。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawItem {
    pub(crate) title: String,
    pub(crate) year: Option<i32>,
    pub(crate) genres: Vec<String>,
    pub(crate) quality: QualitySignal,
    pub(crate) ids: ExternalIds,
}

/// 1 ページ分の取得結果。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CatalogPage {
    pub(crate) items: Vec<RawItem>,
    pub(crate) has_more: bool,
}
