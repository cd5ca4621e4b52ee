//! Identity resolution cache: provider-native id → canonical id, with
//! separate TTLs for found, not-found and transient-error entries so a
//! permanently unresolvable id is not retried on every run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CanonicalId;
use crate::store::files;

#[derive(Debug, Clone, Copy)]
pub struct IdentityTtls {
    pub found: Duration,
    pub not_found: Duration,
    pub error: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum CachedIdentity {
    Found { id: CanonicalId, at: DateTime<Utc> },
    NotFound { at: DateTime<Utc> },
    Error { at: DateTime<Utc> },
}

impl CachedIdentity {
    fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Found { at, .. } | Self::NotFound { at } | Self::Error { at } => *at,
        }
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLookup {
    /// Fresh positive entry.
    Found(CanonicalId),
    /// Fresh negative or error entry; do not ask the provider again yet.
    Unresolvable,
    /// No usable entry; ask the provider.
    Miss,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IdentityFile {
    entries: BTreeMap<String, CachedIdentity>,
}

#[derive(Debug, Default)]
struct IdentityInner {
    entries: BTreeMap<String, CachedIdentity>,
    dirty: bool,
}

/// File-backed identity cache, loaded at startup and flushed at the end of
/// the batch.
#[derive(Debug)]
pub struct IdentityCache {
    path: PathBuf,
    ttls: IdentityTtls,
    inner: Mutex<IdentityInner>,
}

impl IdentityCache {
    pub fn new(path: PathBuf, ttls: IdentityTtls) -> Self {
        let file: IdentityFile = files::read_json_or_default(&path);
        Self {
            path,
            ttls,
            inner: Mutex::new(IdentityInner {
                entries: file.entries,
                dirty: false,
            }),
        }
    }

    fn ttl_for(&self, entry: &CachedIdentity) -> Duration {
        match entry {
            CachedIdentity::Found { .. } => self.ttls.found,
            CachedIdentity::NotFound { .. } => self.ttls.not_found,
            CachedIdentity::Error { .. } => self.ttls.error,
        }
    }

    fn is_fresh(&self, entry: &CachedIdentity, now: DateTime<Utc>) -> bool {
        let age = (now - entry.at()).to_std().unwrap_or(Duration::ZERO);
        age <= self.ttl_for(entry)
    }

    pub fn lookup(&self, key: &str, now: DateTime<Utc>) -> IdentityLookup {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.entries.get(key) {
            Some(entry) if self.is_fresh(entry, now) => match entry {
                CachedIdentity::Found { id, .. } => IdentityLookup::Found(id.clone()),
                CachedIdentity::NotFound { .. } | CachedIdentity::Error { .. } => {
                    IdentityLookup::Unresolvable
                }
            },
            _ => IdentityLookup::Miss,
        }
    }

    pub fn store_found(&self, key: &str, id: CanonicalId, at: DateTime<Utc>) {
        self.store(key, CachedIdentity::Found { id, at });
    }

    pub fn store_missing(&self, key: &str, at: DateTime<Utc>) {
        self.store(key, CachedIdentity::NotFound { at });
    }

    pub fn store_error(&self, key: &str, at: DateTime<Utc>) {
        self.store(key, CachedIdentity::Error { at });
    }

    fn store(&self, key: &str, entry: CachedIdentity) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.entries.insert(key.to_string(), entry);
        inner.dirty = true;
    }

    /// Drop expired entries and write the file back if anything changed.
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
        let file = IdentityFile {
            entries: inner.entries.clone(),
        };
        files::write_json_atomic(&self.path, &file).context("failed to flush identity cache")?;
        inner.dirty = false;
        Ok(())
    }
}
