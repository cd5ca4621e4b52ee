//! Novelty boosts and repetition penalties.
//!
//! Per-list history makes unseen items attractive and long-absent items
//! slowly attractive again; exposure counts and same-run duplication across
//! sibling lists push back in the other direction.

use chrono::{DateTime, Utc};

use crate::lists::StrategyParams;
use crate::store::history::HistoryRecord;
use crate::util::time;

/// Novelty boost for one candidate, plus whether it counts as a new entry.
///
/// Unseen items get the flat new-entry boost. Seen items age back towards
/// attractiveness with every day since the last sighting, capped, and lose
/// a fixed amount per prior sighting. The result goes negative for items
/// the list has surfaced often and recently.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn novelty_boost(
    record: Option<&HistoryRecord>,
    now: DateTime<Utc>,
    strategy: &StrategyParams,
) -> (f64, bool) {
    match record {
        None => (strategy.new_boost, true),
        Some(seen) => {
            let days = time::days_between(seen.last_seen_at, now).max(0) as f64;
            let aging = (days * strategy.aging_per_day).clamp(0.0, strategy.aging_max);
            let penalty = f64::from(seen.seen_count) * strategy.seen_penalty;
            (aging - penalty, false)
        }
    }
}

/// Penalty for items this worker has already shown, capped so chronically
/// popular items are damped rather than buried.
pub(crate) fn exposure_penalty(shown_count: u32, strategy: &StrategyParams) -> f64 {
    (f64::from(shown_count) * strategy.exposure_penalty_per_show)
        .clamp(0.0, strategy.exposure_penalty_cap)
}

/// Penalty for items already placed on sibling lists earlier in this run.
pub(crate) fn duplicate_penalty(cross_list_uses: u32, strategy: &StrategyParams) -> f64 {
    f64::from(cross_list_uses) * strategy.duplicate_penalty_per_hit
}
