//! Phased list selection: stable core, guaranteed new entrants, best fill.
//!
//! Selection appends in three phases and never reorders earlier picks, so
//! the final list order is the admission order. Diversity caps constrain
//! only the top window of the list; the overlap cap binds from the second
//! phase onward; the third phase relaxes both rather than leave slots empty.

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use xxhash_rust::xxh3::xxh3_64;

use crate::lists::StrategyParams;
use crate::model::{CanonicalId, CatalogItem};
use crate::pipeline::ListJob;
use crate::pipeline::score::ScoredCandidate;

/// Which phase admitted an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    Core,
    NewEntrant,
    Fill,
}

/// One admitted entry, in final list order.
#[derive(Debug, Clone)]
pub struct SelectedEntry {
    pub scored: ScoredCandidate,
    pub phase: SelectionPhase,
    /// The score the admitting phase ranked by: core score for the stable
    /// core, rotation score everywhere else.
    pub final_score: f64,
    /// Present anywhere in the previous edition of the list.
    pub in_previous: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionMetrics {
    pub core_target: usize,
    pub core_selected: usize,
    pub overlap_cap: usize,
    pub overlap: usize,
    pub new_entrants: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub entries: Vec<SelectedEntry>,
    pub metrics: SelectionMetrics,
}

/// Deterministic exploration jitter in `[-amplitude, +amplitude)`.
///
/// Keyed by list, period, and item: re-runs within one rotation period
/// tie-break identically, while the next period reshuffles.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn exploration_jitter(
    list_id: &str,
    period_key: &str,
    id: &CanonicalId,
    amplitude: f64,
) -> f64 {
    if amplitude == 0.0 {
        return 0.0;
    }
    let hash = xxh3_64(format!("{list_id}|{period_key}|{id}").as_bytes());
    // Top 53 bits map onto [0, 1) without precision loss.
    let unit = (hash >> 11) as f64 / (1u64 << 53) as f64;
    (2.0 * unit - 1.0) * amplitude
}

/// Counts genre, decade, and franchise occupancy within the top window.
/// Positions past the window are unconstrained and untracked.
struct DiversityTracker {
    top_window: usize,
    genre_cap: usize,
    decade_cap: usize,
    franchise_cap: usize,
    genres: FxHashMap<String, usize>,
    decades: FxHashMap<i32, usize>,
    franchises: FxHashMap<String, usize>,
}

impl DiversityTracker {
    fn new(strategy: &StrategyParams) -> Self {
        Self {
            top_window: strategy.top_window,
            genre_cap: strategy.max_primary_genre_top,
            decade_cap: strategy.max_per_decade_top,
            franchise_cap: strategy.max_per_franchise_top,
            genres: FxHashMap::default(),
            decades: FxHashMap::default(),
            franchises: FxHashMap::default(),
        }
    }

    /// Admit when every cap still holds at this position, recording the
    /// occupancy on success. `relaxed` allows one extra per dimension.
    fn try_admit(&mut self, item: &CatalogItem, position: usize, relaxed: bool) -> bool {
        if position >= self.top_window {
            return true;
        }
        let slack = usize::from(relaxed);
        let genre = item.primary_genre().to_string();
        let decade = item.decade_bucket();
        let franchise = item.franchise_key();

        if self.genres.get(&genre).copied().unwrap_or(0) >= self.genre_cap + slack {
            return false;
        }
        if self.decades.get(&decade).copied().unwrap_or(0) >= self.decade_cap + slack {
            return false;
        }
        if self.franchises.get(&franchise).copied().unwrap_or(0) >= self.franchise_cap + slack {
            return false;
        }

        *self.genres.entry(genre).or_insert(0) += 1;
        *self.decades.entry(decade).or_insert(0) += 1;
        *self.franchises.entry(franchise).or_insert(0) += 1;
        true
    }
}

fn sort_ranked(entries: &mut [(&ScoredCandidate, f64)]) {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.id().cmp(b.0.id()))
    });
}

/// Select the final list from a scored pool.
///
/// `pool` must already be ordered by total score; `previous` is the prior
/// edition's item ids in list order, empty on the first run.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]
pub fn select_entries(
    pool: &[ScoredCandidate],
    previous: &[CanonicalId],
    final_size: usize,
    strategy: &StrategyParams,
    list_id: &str,
    period_key: &str,
) -> Selection {
    let core_target = (final_size as f64 * strategy.stable_core_ratio).round() as usize;
    let overlap_cap = (final_size as f64 * strategy.max_overlap_ratio).floor() as usize;
    let new_target = (final_size as f64 * strategy.new_entrant_min_ratio).ceil() as usize;

    let prev_positions: FxHashMap<&CanonicalId, usize> = previous
        .iter()
        .enumerate()
        .map(|(position, id)| (id, position))
        .collect();
    let prev_core: FxHashSet<&CanonicalId> = previous.iter().take(core_target).collect();

    let rotation_score = |candidate: &ScoredCandidate| {
        candidate.total_score()
            + exploration_jitter(list_id, period_key, candidate.id(), strategy.exploration_jitter)
            + candidate.novelty_boost * strategy.novelty_rotation_weight
            + if candidate.is_new {
                strategy.new_entry_priority_boost
            } else {
                0.0
            }
    };

    let mut entries: Vec<SelectedEntry> = Vec::with_capacity(final_size.min(pool.len()));
    let mut taken: FxHashSet<&CanonicalId> = FxHashSet::default();
    let mut diversity = DiversityTracker::new(strategy);
    let mut overlap = 0usize;

    // Phase 1: re-seat the previous top of list, reinforced so a mild score
    // dip does not evict it. The overlap cap does not apply to the core.
    let mut core: Vec<(&ScoredCandidate, f64)> = pool
        .iter()
        .filter(|candidate| prev_core.contains(candidate.id()))
        .map(|candidate| {
            (
                candidate,
                candidate.total_score() + strategy.core_reinforce_boost,
            )
        })
        .collect();
    sort_ranked(&mut core);
    for relaxed in [false, true] {
        for (candidate, score) in &core {
            if entries.len() >= core_target {
                break;
            }
            if taken.contains(candidate.id()) {
                continue;
            }
            if !diversity.try_admit(&candidate.candidate.item, entries.len(), relaxed) {
                continue;
            }
            taken.insert(candidate.id());
            overlap += 1;
            entries.push(SelectedEntry {
                scored: (*candidate).clone(),
                phase: SelectionPhase::Core,
                final_score: *score,
                in_previous: true,
            });
        }
    }
    let core_selected = entries.len();

    // Phase 2: guarantee the new-entrant quota from items absent from the
    // previous edition, ranked by rotation score.
    let mut entrants: Vec<(&ScoredCandidate, f64)> = pool
        .iter()
        .filter(|candidate| {
            !prev_positions.contains_key(candidate.id()) && !taken.contains(candidate.id())
        })
        .map(|candidate| (candidate, rotation_score(candidate)))
        .collect();
    sort_ranked(&mut entrants);
    let mut fresh_admitted = 0usize;
    for (candidate, score) in &entrants {
        if entries.len() >= final_size || fresh_admitted >= new_target {
            break;
        }
        if !diversity.try_admit(&candidate.candidate.item, entries.len(), false) {
            continue;
        }
        taken.insert(candidate.id());
        fresh_admitted += 1;
        entries.push(SelectedEntry {
            scored: (*candidate).clone(),
            phase: SelectionPhase::NewEntrant,
            final_score: *score,
            in_previous: false,
        });
    }

    // Phase 3: best remaining by rotation score. Strict first, then relaxed
    // diversity, then with the overlap cap lifted so a thin pool still
    // yields a full list.
    let mut remaining: Vec<(&ScoredCandidate, f64)> = pool
        .iter()
        .filter(|candidate| !taken.contains(candidate.id()))
        .map(|candidate| (candidate, rotation_score(candidate)))
        .collect();
    sort_ranked(&mut remaining);
    for (relaxed, enforce_overlap) in [(false, true), (true, true), (true, false)] {
        for (candidate, score) in &remaining {
            if entries.len() >= final_size {
                break;
            }
            if taken.contains(candidate.id()) {
                continue;
            }
            let in_previous = prev_positions.contains_key(candidate.id());
            if enforce_overlap && in_previous && overlap >= overlap_cap {
                continue;
            }
            if !diversity.try_admit(&candidate.candidate.item, entries.len(), relaxed) {
                continue;
            }
            taken.insert(candidate.id());
            if in_previous {
                overlap += 1;
            }
            entries.push(SelectedEntry {
                scored: (*candidate).clone(),
                phase: SelectionPhase::Fill,
                final_score: *score,
                in_previous,
            });
        }
    }

    let new_entrants = entries.iter().filter(|entry| !entry.in_previous).count();
    Selection {
        entries,
        metrics: SelectionMetrics {
            core_target,
            core_selected,
            overlap_cap,
            overlap,
            new_entrants,
        },
    }
}

#[async_trait]
pub(crate) trait SelectStage: Send + Sync {
    async fn select(
        &self,
        job: &ListJob,
        pool: &[ScoredCandidate],
        previous: &[CanonicalId],
    ) -> Result<Selection>;
}

/// The production select stage: a thin wrapper over [`select_entries`].
pub(crate) struct RotationSelectStage;

#[async_trait]
impl SelectStage for RotationSelectStage {
    async fn select(
        &self,
        job: &ListJob,
        pool: &[ScoredCandidate],
        previous: &[CanonicalId],
    ) -> Result<Selection> {
        Ok(select_entries(
            pool,
            previous,
            job.list.final_size,
            &job.strategy,
            &job.list.id,
            &job.period_key,
        ))
    }
}
