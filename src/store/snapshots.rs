//! Per-source snapshots: the last successfully fetched (normalized) items
//! for one source identity, replayed when the live fetch fails. One file per
//! distinct provider/path/filter identity, shared by lists that configure
//! the same source.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CatalogItem;
use crate::store::files;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub provider: String,
    pub path: String,
    pub filters: String,
    pub saved_at: DateTime<Utc>,
    pub items: Vec<CatalogItem>,
}

/// Stable on-disk key for one source identity.
pub fn meta_key(provider: &str, path: &str, filters: &str) -> String {
    format!("{:x}", md5::compute(format!("{provider}|{path}|{filters}")))
}

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    ttl: Duration,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load the snapshot for `key` if it exists and is within the TTL.
    /// Unreadable snapshots count as absent.
    pub fn load_fresh(&self, key: &str, now: DateTime<Utc>) -> Option<SourceSnapshot> {
        let path = self.path_for(key);
        let snapshot: SourceSnapshot = match files::read_json(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable snapshot"
                );
                return None;
            }
        };
        let age = (now - snapshot.saved_at).to_std().unwrap_or(Duration::ZERO);
        if age > self.ttl {
            return None;
        }
        Some(snapshot)
    }

    pub fn save(&self, key: &str, snapshot: &SourceSnapshot) -> Result<()> {
        files::write_json_atomic(&self.path_for(key), snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use crate::model::{CanonicalId, QualitySignal};

    use super::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, day, 0, 0, 0).unwrap()
    }

    fn snapshot(saved_at: DateTime<Utc>) -> SourceSnapshot {
        SourceSnapshot {
            provider: "trakt".to_string(),
            path: "movies/trending".to_string(),
            filters: "y:*..*|in:|ex:".to_string(),
            saved_at,
            items: vec![CatalogItem {
                id: CanonicalId::parse("tt0133093").unwrap(),
                title: "The Matrix".to_string(),
                year: Some(1999),
                genres: ["action", "sci-fi"]
                    .into_iter()
                    .map(str::to_string)
                    .collect::<BTreeSet<_>>(),
                quality: QualitySignal {
                    rating: Some(8.7),
                    votes: 2_000_000,
                    popularity: 80.0,
                },
            }],
        }
    }

    #[test]
    fn meta_key_is_stable_and_distinct() {
        let a = meta_key("trakt", "movies/trending", "y:*..*|in:|ex:");
        let b = meta_key("trakt", "movies/trending", "y:*..*|in:|ex:");
        let c = meta_key("trakt", "movies/popular", "y:*..*|in:|ex:");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn save_then_load_fresh_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().to_path_buf(), Duration::from_secs(72 * 3600));
        let key = meta_key("trakt", "movies/trending", "");

        let snap = snapshot(at(1));
        store.save(&key, &snap).expect("save");

        assert_eq!(store.load_fresh(&key, at(2)), Some(snap));
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().to_path_buf(), Duration::from_secs(72 * 3600));
        let key = meta_key("trakt", "movies/trending", "");

        store.save(&key, &snapshot(at(1))).expect("save");

        assert!(store.load_fresh(&key, at(10)).is_none());
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().to_path_buf(), Duration::from_secs(3600));

        assert!(store.load_fresh("0123456789abcdef0123456789abcdef", at(1)).is_none());
    }
}
