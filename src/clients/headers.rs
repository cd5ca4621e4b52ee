//! プロバイダ共通の HTTP ヘッダーヘルパー。

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Response;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};

/// 全リクエストで名乗る User-Agent。
pub(crate) const USER_AGENT_VALUE: &str = concat!("catalog-worker/", env!("CARGO_PKG_VERSION"));

/// Trakt API が要求する固定ヘッダーを組み立てる。
///
/// API バージョンのピン留めと client id は必須。アクセストークンは
/// 任意で、与えられた場合のみ Bearer として付与する。
pub(crate) fn trakt_headers(client_id: &str, access_token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("trakt-api-version", HeaderValue::from_static("2"));
    headers.insert(
        "trakt-api-key",
        HeaderValue::from_str(client_id).context("trakt client id is not a valid header value")?,
    );
    if let Some(token) = access_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("trakt access token is not a valid header value")?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// 整数秒形式の `Retry-After` ヘッダーを読み取る。
///
/// HTTP-date 形式はプロバイダが実際には返さないため対応しない。
pub(crate) fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
