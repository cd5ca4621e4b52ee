/// IMDB形式の正規IDの検証と抽出。
use once_cell::sync::Lazy;
use regex::Regex;

static CANONICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d{7,8}$").expect("canonical id pattern"));

static EMBEDDED: Lazy<Regex> = Lazy::new(|| Regex::new(r"tt\d{7,8}").expect("embedded id pattern"));

/// 文字列がそのまま正規ID（`tt` + 7〜8桁）かどうか。
#[must_use]
pub(crate) fn is_canonical(raw: &str) -> bool {
    CANONICAL.is_match(raw)
}

/// URLやスラッグに埋め込まれた正規IDを抽出する。
#[must_use]
pub(crate) fn extract(raw: &str) -> Option<&str> {
    EMBEDDED.find(raw).map(|found| found.as_str())
}
