//! Rating cache: quality signals fetched from the rating provider, persisted
//! between runs so enrichment stays within its per-run lookup budget. A
//! default (empty) signal is stored for ids the provider knows nothing
//! about, which suppresses repeat lookups until the entry expires.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CanonicalId, QualitySignal};
use crate::store::files;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RatingEntry {
    #[serde(flatten)]
    quality: QualitySignal,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RatingFile {
    entries: BTreeMap<String, RatingEntry>,
}

#[derive(Debug, Default)]
struct RatingInner {
    entries: BTreeMap<String, RatingEntry>,
    dirty: bool,
}

#[derive(Debug)]
pub struct RatingCache {
    path: PathBuf,
    ttl: Duration,
    inner: Mutex<RatingInner>,
}

impl RatingCache {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        let file: RatingFile = files::read_json_or_default(&path);
        Self {
            path,
            ttl,
            inner: Mutex::new(RatingInner {
                entries: file.entries,
                dirty: false,
            }),
        }
    }

    fn is_fresh(&self, entry: &RatingEntry, now: DateTime<Utc>) -> bool {
        let age = (now - entry.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age <= self.ttl
    }

    /// Fresh cached signal for `id`, if any. A `Some` with an empty signal
    /// means the provider was already asked and had nothing.
    pub fn lookup(&self, id: &CanonicalId, now: DateTime<Utc>) -> Option<QualitySignal> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .entries
            .get(id.as_str())
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.quality.clone())
    }

    pub fn store(&self, id: &CanonicalId, quality: QualitySignal, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.entries.insert(
            id.as_str().to_string(),
            RatingEntry {
                quality,
                fetched_at: now,
            },
        );
        inner.dirty = true;
    }

    /// Drop stale entries and write the file back if anything changed.
    pub fn flush(&self, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| self.is_fresh(entry, now));
        if inner.entries.len() != before {
            inner.dirty = true;
        }
        if !inner.dirty {
            return Ok(());
        }
        let file = RatingFile {
            entries: inner.entries.clone(),
        };
        files::write_json_atomic(&self.path, &file).context("failed to flush rating cache")?;
        inner.dirty = false;
        Ok(())
    }
}
