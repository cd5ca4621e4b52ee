/// エラー分類とリトライ判定ユーティリティ。
use anyhow::Error;
use reqwest::StatusCode;

use crate::clients::ProviderError;
use crate::config::ConfigError;
use crate::lists::ListsError;

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// リトライ可能なエラー（一時的なネットワークエラー、タイムアウトなど）
    Retryable,
    /// リトライ不可能なエラー（バリデーションエラー、デコード失敗など）
    NonRetryable,
    /// 致命的なエラー（認証エラー、設定エラー、永続化失敗など）
    Fatal,
}

/// エラーを分類する。
#[must_use]
pub(crate) fn classify_error(error: &Error) -> ErrorKind {
    // プロバイダエラーは自身の分類に従う
    if let Some(provider_err) = error.downcast_ref::<ProviderError>() {
        return provider_err.kind();
    }

    // HTTPエラーの判定
    if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
        if reqwest_err.is_timeout() || reqwest_err.is_connect() {
            return ErrorKind::Retryable;
        }

        if let Some(status) = reqwest_err.status() {
            match status {
                StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS => return ErrorKind::Retryable,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return ErrorKind::Fatal,
                _ => return ErrorKind::NonRetryable,
            }
        }
    }

    // 設定・リスト定義・永続化のエラーは致命的
    if error.downcast_ref::<ConfigError>().is_some()
        || error.downcast_ref::<ListsError>().is_some()
        || error.downcast_ref::<std::io::Error>().is_some()
    {
        return ErrorKind::Fatal;
    }

    // デフォルトはリトライ不可能
    ErrorKind::NonRetryable
}

/// エラーが致命的かどうかを判定する。
#[must_use]
pub(crate) fn is_fatal(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Fatal)
}
