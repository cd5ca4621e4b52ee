/// 期間キーと日数計算のユーティリティ。
use chrono::{DateTime, Datelike, Utc};

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// 日次の期間キー（例: `2026-08-23`）。
#[must_use]
pub(crate) fn daily_period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// 週次の期間キー（ISO週、例: `2026-W34`）。
#[must_use]
pub(crate) fn weekly_period_key(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// 2時点間の丸一日数（`to < from` の場合は負）。
#[must_use]
pub(crate) fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days()
}
