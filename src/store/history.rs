//! Cross-run engine state: one history file per list plus the shared
//! exposure map. Only the state manager mutates these; scoring reads
//! cloned views so the selection stays a pure function of its inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CanonicalId;
use crate::store::files;

/// Per-list sighting record. `seen_count` starts at 1 on first insert;
/// a zero count is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u32,
}

/// Global cross-list exposure record, shared by every list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub shown_count: u32,
    pub last_shown_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    entries: BTreeMap<CanonicalId, HistoryRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ExposureFile {
    entries: BTreeMap<CanonicalId, ExposureRecord>,
}

#[derive(Debug, Default)]
struct StateInner {
    histories: BTreeMap<String, HistoryFile>,
    dirty_lists: BTreeSet<String>,
    exposure: ExposureFile,
    exposure_dirty: bool,
}

/// File-backed history/exposure store rooted at `<data_dir>/state`.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    inner: Mutex<StateInner>,
}

impl StateStore {
    pub fn new(root: PathBuf) -> Self {
        let exposure = files::read_json_or_default(&root.join("exposure.json"));
        Self {
            root,
            inner: Mutex::new(StateInner {
                exposure,
                ..StateInner::default()
            }),
        }
    }

    fn history_path(&self, list_id: &str) -> PathBuf {
        self.root.join("history").join(format!("{list_id}.json"))
    }

    /// Snapshot of one list's history, loading its file on first access.
    pub fn history_view(&self, list_id: &str) -> BTreeMap<CanonicalId, HistoryRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !inner.histories.contains_key(list_id) {
            let file = files::read_json_or_default(&self.history_path(list_id));
            inner.histories.insert(list_id.to_string(), file);
        }
        inner
            .histories
            .get(list_id)
            .map(|file| file.entries.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the global exposure counts.
    pub fn exposure_view(&self) -> BTreeMap<CanonicalId, u32> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .exposure
            .entries
            .iter()
            .map(|(id, record)| (id.clone(), record.shown_count))
            .collect()
    }

    /// Bump history and exposure for every item a list just selected.
    pub fn record_list(&self, list_id: &str, items: &[CanonicalId], at: DateTime<Utc>) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let inner = &mut *guard;
        let history = inner
            .histories
            .entry(list_id.to_string())
            .or_insert_with(|| files::read_json_or_default(&self.history_path(list_id)));
        for id in items {
            history
                .entries
                .entry(id.clone())
                .and_modify(|record| {
                    record.seen_count = record.seen_count.saturating_add(1);
                    record.last_seen_at = at;
                })
                .or_insert(HistoryRecord {
                    first_seen_at: at,
                    last_seen_at: at,
                    seen_count: 1,
                });
            inner
                .exposure
                .entries
                .entry(id.clone())
                .and_modify(|record| {
                    record.shown_count = record.shown_count.saturating_add(1);
                    record.last_shown_at = at;
                })
                .or_insert(ExposureRecord {
                    shown_count: 1,
                    last_shown_at: at,
                });
        }
        inner.dirty_lists.insert(list_id.to_string());
        inner.exposure_dirty = true;
    }

    /// Prune both maps to their caps, evicting the oldest entries by their
    /// timestamp field. Called once after all lists have run.
    pub fn prune(&self, history_max: usize, exposure_max: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut trimmed_lists = Vec::new();
        for (list_id, file) in &mut inner.histories {
            if prune_map(&mut file.entries, history_max, |record| record.last_seen_at) {
                trimmed_lists.push(list_id.clone());
            }
        }
        for list_id in trimmed_lists {
            inner.dirty_lists.insert(list_id);
        }
        if prune_map(&mut inner.exposure.entries, exposure_max, |record| {
            record.last_shown_at
        }) {
            inner.exposure_dirty = true;
        }
    }

    /// Write every dirty file back to disk.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dirty: Vec<String> = inner.dirty_lists.iter().cloned().collect();
        for list_id in dirty {
            if let Some(file) = inner.histories.get(&list_id) {
                files::write_json_atomic(&self.history_path(&list_id), file)
                    .with_context(|| format!("failed to flush history for list '{list_id}'"))?;
            }
            inner.dirty_lists.remove(&list_id);
        }
        if inner.exposure_dirty {
            files::write_json_atomic(&self.root.join("exposure.json"), &inner.exposure)
                .context("failed to flush exposure state")?;
            inner.exposure_dirty = false;
        }
        Ok(())
    }
}

/// Keep the `cap` newest entries by `timestamp`, ties broken by id so the
/// survivor set is deterministic. Returns whether anything was evicted.
fn prune_map<V>(
    entries: &mut BTreeMap<CanonicalId, V>,
    cap: usize,
    timestamp: impl Fn(&V) -> DateTime<Utc>,
) -> bool {
    if entries.len() <= cap {
        return false;
    }
    let mut ordered: Vec<(CanonicalId, DateTime<Utc>)> = entries
        .iter()
        .map(|(id, value)| (id.clone(), timestamp(value)))
        .collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (id, _) in ordered.drain(cap..) {
        entries.remove(&id);
    }
    true
}
