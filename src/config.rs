use std::{env, path::Path, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    data_dir: PathBuf,
    lists_path: PathBuf,
    trakt_base_url: String,
    trakt_client_id: Option<String>,
    trakt_tokens_path: Option<PathBuf>,
    tmdb_base_url: String,
    tmdb_api_key: Option<String>,
    http_connect_timeout: Duration,
    http_total_timeout: Duration,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
    source_pacing: Duration,
    page_limit: u32,
    snapshot_ttl: Duration,
    identity_found_ttl: Duration,
    identity_missing_ttl: Duration,
    identity_error_ttl: Duration,
    rating_ttl: Duration,
    rating_lookup_budget: usize,
    history_max_entries: usize,
    exposure_max_entries: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Catalog Worker の設定値を読み込み、検証する。
    ///
    /// すべての環境変数にデフォルト値があるため、未設定でも起動できる。
    /// プロバイダの認証情報はリスト定義が実際に参照する時点で検証される。
    ///
    /// # Errors
    /// 数値や時間のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = parse_path("CATALOG_DATA_DIR", "./data");
        let lists_path = parse_path("CATALOG_LISTS_PATH", "./lists.json");

        // Provider endpoints and credentials
        let trakt_base_url = env::var("CATALOG_TRAKT_BASE_URL")
            .unwrap_or_else(|_| "https://api.trakt.tv".to_string());
        let trakt_client_id = env::var("CATALOG_TRAKT_CLIENT_ID").ok();
        let trakt_tokens_path = env::var("CATALOG_TRAKT_TOKENS_PATH").ok().map(PathBuf::from);
        let tmdb_base_url = env::var("CATALOG_TMDB_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());
        let tmdb_api_key = env::var("CATALOG_TMDB_API_KEY").ok();

        // HTTP timeout settings
        let http_connect_timeout = parse_duration_ms("CATALOG_HTTP_CONNECT_TIMEOUT_MS", 3000)?;
        let http_total_timeout = parse_duration_ms("CATALOG_HTTP_TOTAL_TIMEOUT_MS", 20000)?;

        // Retry settings (exponential backoff + jitter)
        let http_max_retries = parse_usize("CATALOG_HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("CATALOG_HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("CATALOG_HTTP_BACKOFF_CAP_MS", 10000)?;

        // Fetch pacing between sources
        let source_pacing = parse_duration_ms("CATALOG_SOURCE_PACING_MS", 1000)?;
        let page_limit = parse_u32("CATALOG_PAGE_LIMIT", 50)?;

        // Cache lifetimes
        let snapshot_ttl = parse_duration_hours("CATALOG_SNAPSHOT_TTL_HOURS", 72)?;
        let identity_found_ttl = parse_duration_days("CATALOG_IDENTITY_TTL_DAYS", 30)?;
        let identity_missing_ttl = parse_duration_days("CATALOG_IDENTITY_NEGATIVE_TTL_DAYS", 7)?;
        let identity_error_ttl = parse_duration_hours("CATALOG_IDENTITY_ERROR_TTL_HOURS", 6)?;
        let rating_ttl = parse_duration_days("CATALOG_RATING_TTL_DAYS", 7)?;
        let rating_lookup_budget = parse_usize("CATALOG_RATING_LOOKUP_BUDGET", 40)?;

        // State retention caps
        let history_max_entries = parse_usize("CATALOG_HISTORY_MAX_ENTRIES", 2000)?;
        let exposure_max_entries = parse_usize("CATALOG_EXPOSURE_MAX_ENTRIES", 5000)?;

        Ok(Self {
            data_dir,
            lists_path,
            trakt_base_url,
            trakt_client_id,
            trakt_tokens_path,
            tmdb_base_url,
            tmdb_api_key,
            http_connect_timeout,
            http_total_timeout,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
            source_pacing,
            page_limit,
            snapshot_ttl,
            identity_found_ttl,
            identity_missing_ttl,
            identity_error_ttl,
            rating_ttl,
            rating_lookup_budget,
            history_max_entries,
            exposure_max_entries,
        })
    }

    /// コマンドラインで指定されたリスト定義ファイルのパスを上書きする。
    #[must_use]
    pub fn with_lists_path(mut self, path: PathBuf) -> Self {
        self.lists_path = path;
        self
    }

    /// コマンドラインで指定されたデータディレクトリを上書きする。
    #[must_use]
    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.data_dir = path;
        self
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn lists_path(&self) -> &Path {
        &self.lists_path
    }

    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    #[must_use]
    pub fn trakt_base_url(&self) -> &str {
        &self.trakt_base_url
    }

    #[must_use]
    pub fn trakt_client_id(&self) -> Option<&str> {
        self.trakt_client_id.as_deref()
    }

    /// Trakt を参照するリストが定義されているときに呼ばれ、クライアント ID
    /// が未設定なら起動時エラーにする。
    ///
    /// # Errors
    /// `CATALOG_TRAKT_CLIENT_ID` が未設定の場合は [`ConfigError::Missing`] を返す。
    pub fn require_trakt_client_id(&self) -> Result<&str, ConfigError> {
        self.trakt_client_id
            .as_deref()
            .ok_or(ConfigError::Missing("CATALOG_TRAKT_CLIENT_ID"))
    }

    #[must_use]
    pub fn trakt_tokens_path(&self) -> Option<&Path> {
        self.trakt_tokens_path.as_deref()
    }

    #[must_use]
    pub fn tmdb_base_url(&self) -> &str {
        &self.tmdb_base_url
    }

    #[must_use]
    pub fn tmdb_api_key(&self) -> Option<&str> {
        self.tmdb_api_key.as_deref()
    }

    /// TMDB を参照するリストが定義されているときに呼ばれ、API キーが
    /// 未設定なら起動時エラーにする。
    ///
    /// # Errors
    /// `CATALOG_TMDB_API_KEY` が未設定の場合は [`ConfigError::Missing`] を返す。
    pub fn require_tmdb_api_key(&self) -> Result<&str, ConfigError> {
        self.tmdb_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("CATALOG_TMDB_API_KEY"))
    }

    #[must_use]
    pub fn http_connect_timeout(&self) -> Duration {
        self.http_connect_timeout
    }

    #[must_use]
    pub fn http_total_timeout(&self) -> Duration {
        self.http_total_timeout
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }

    #[must_use]
    pub fn source_pacing(&self) -> Duration {
        self.source_pacing
    }

    #[must_use]
    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    #[must_use]
    pub fn snapshot_ttl(&self) -> Duration {
        self.snapshot_ttl
    }

    #[must_use]
    pub fn identity_found_ttl(&self) -> Duration {
        self.identity_found_ttl
    }

    #[must_use]
    pub fn identity_missing_ttl(&self) -> Duration {
        self.identity_missing_ttl
    }

    #[must_use]
    pub fn identity_error_ttl(&self) -> Duration {
        self.identity_error_ttl
    }

    #[must_use]
    pub fn rating_ttl(&self) -> Duration {
        self.rating_ttl
    }

    #[must_use]
    pub fn rating_lookup_budget(&self) -> usize {
        self.rating_lookup_budget
    }

    #[must_use]
    pub fn history_max_entries(&self) -> usize {
        self.history_max_entries
    }

    #[must_use]
    pub fn exposure_max_entries(&self) -> usize {
        self.exposure_max_entries
    }
}

fn parse_path(name: &'static str, default: &str) -> PathBuf {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    PathBuf::from(raw)
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_duration_hours(name: &'static str, default_hours: u64) -> Result<Duration, ConfigError> {
    let hours = parse_u64(name, default_hours)?;
    Ok(Duration::from_secs(hours * 3600))
}

fn parse_duration_days(name: &'static str, default_days: u64) -> Result<Duration, ConfigError> {
    let days = parse_u64(name, default_days)?;
    Ok(Duration::from_secs(days * 86400))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}
