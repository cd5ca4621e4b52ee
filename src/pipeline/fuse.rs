//! Weighted rank fusion across sources.
//!
//! Every source hands over a ranked item list; fusion merges them into one
//! candidate pool keyed by canonical id. An item ranked by several sources
//! accumulates one [`SourceHit`] per source, which raises both its fusion
//! score and the source weight that later normalizes the source boost.

use rustc_hash::FxHashMap;
use smallvec::smallvec;

use crate::model::{Candidate, CanonicalId, CatalogItem, SourceHit};

/// One source's resolved, filtered, ranked items for a single run.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source_id: String,
    /// Effective weight: the configured weight, already reduced when the
    /// batch was served from a snapshot.
    pub weight: f64,
    pub items: Vec<CatalogItem>,
}

/// The fused candidate pool, ordered by fusion score.
#[derive(Debug, Clone, Default)]
pub struct FusedPool {
    pub candidates: Vec<Candidate>,
}

/// Merge ranked source batches into one deduplicated pool.
///
/// Metadata gaps on a merged item are filled from whichever source has the
/// field: ratings merge towards the most informative signal, genres union,
/// the first source to name a title or year wins. Ordering is fusion score
/// descending with canonical id ascending as the tie break.
#[must_use]
pub fn fuse_batches(batches: Vec<SourceBatch>) -> FusedPool {
    let mut merged: FxHashMap<CanonicalId, Candidate> = FxHashMap::default();

    for batch in batches {
        let total = batch.items.len();
        for (rank, item) in batch.items.into_iter().enumerate() {
            let hit = SourceHit {
                source_id: batch.source_id.clone(),
                rank,
                total,
                weight: batch.weight,
            };
            if let Some(existing) = merged.get_mut(&item.id) {
                // The same id twice within one source keeps its best rank.
                if existing
                    .hits
                    .iter()
                    .any(|seen| seen.source_id == hit.source_id)
                {
                    continue;
                }
                existing.item.quality.merge(&item.quality);
                if existing.item.year.is_none() {
                    existing.item.year = item.year;
                }
                existing.item.genres.extend(item.genres);
                existing.hits.push(hit);
            } else {
                merged.insert(
                    item.id.clone(),
                    Candidate {
                        item,
                        hits: smallvec![hit],
                    },
                );
            }
        }
    }

    let mut candidates: Vec<Candidate> = merged.into_values().collect();
    candidates.sort_by(|a, b| {
        b.fusion_score()
            .partial_cmp(&a.fusion_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id().cmp(b.id()))
    });
    FusedPool { candidates }
}
