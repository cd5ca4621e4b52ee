//! Shared domain types for catalog curation.
//!
//! Everything the pipeline hands between stages is defined here: canonical
//! identities, normalized catalog items, fused candidates with per-source
//! rank contributions, and the persisted list output.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::lists::StrategyParams;
use crate::util::ids;

/// Canonical catalog identity: an IMDB id (`tt` followed by 7-8 digits).
///
/// Every provider-specific id is resolved to this form before fusion so the
/// same title coming from different sources merges into one candidate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Parse a canonical id from a raw string, accepting ids embedded in
    /// URLs or slugs.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if ids::is_canonical(trimmed) {
            return Some(Self(trimmed.to_string()));
        }
        ids::extract(trimmed).map(|found| Self(found.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a list curates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

/// Quality signal attached to an item by a provider or the rating cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignal {
    /// Average rating on a 0-10 scale, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub votes: u64,
    #[serde(default)]
    pub popularity: f64,
}

impl QualitySignal {
    /// Merge another signal into this one, keeping the most informative
    /// value per field: max votes, max popularity, first non-null rating.
    pub fn merge(&mut self, other: &QualitySignal) {
        if self.rating.is_none() {
            self.rating = other.rating;
        }
        self.votes = self.votes.max(other.votes);
        if other.popularity > self.popularity {
            self.popularity = other.popularity;
        }
    }

    #[must_use]
    pub fn has_rating(&self) -> bool {
        self.rating.is_some() && self.votes > 0
    }
}

/// A single provider's normalized catalog entry, before fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: CanonicalId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub genres: BTreeSet<String>,
    #[serde(default)]
    pub quality: QualitySignal,
}

impl CatalogItem {
    /// First genre in lexicographic order, or `"other"` when untagged.
    #[must_use]
    pub fn primary_genre(&self) -> &str {
        self.genres
            .iter()
            .next()
            .map_or("other", String::as_str)
    }

    /// Decade bucket (1990, 2000, ...); 0 when the year is unknown.
    #[must_use]
    pub fn decade_bucket(&self) -> i32 {
        self.year.map_or(0, |year| year - year.rem_euclid(10))
    }

    /// Franchise key used to group sequels and spin-offs for the duplicate
    /// penalty and the per-franchise diversity cap.
    #[must_use]
    pub fn franchise_key(&self) -> String {
        franchise_key_for(&self.title)
    }
}

static SUBTITLE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":|\s-\s|\(").expect("subtitle separator pattern"));

static TRAILING_NUMERALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\s+(?:\d{1,4}|[ivxlc]{1,6}))+$").expect("trailing numeral pattern"));

/// Normalize a title into a franchise key: lowercase, cut at the first
/// subtitle separator (`:`, spaced `-`, or `(`), strip trailing arabic or
/// roman numerals, and collapse whitespace.
#[must_use]
pub fn franchise_key_for(title: &str) -> String {
    let lowered = title.to_lowercase();
    let head = match SUBTITLE_SEPARATOR.find(&lowered) {
        Some(found) => &lowered[..found.start()],
        None => lowered.as_str(),
    };
    let stripped = TRAILING_NUMERALS.replace(head.trim_end(), "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One source's contribution to a fused candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceHit {
    pub source_id: String,
    /// 0-based position within the source's ordering.
    pub rank: usize,
    /// Size of the source's list at fetch time.
    pub total: usize,
    /// Effective weight: the configured source weight, reduced when the
    /// items came from a snapshot instead of a live fetch.
    pub weight: f64,
}

impl SourceHit {
    /// Rank-based contribution: linear position credit scaled to 0-100,
    /// multiplied by the effective source weight.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn contribution(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let position_credit = (self.total - self.rank) as f64 / self.total as f64;
        position_credit * 100.0 * self.weight
    }
}

/// A fused candidate: one canonical item plus every source that ranked it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: CatalogItem,
    pub hits: SmallVec<[SourceHit; 4]>,
}

impl Candidate {
    /// Sum of rank contributions across all sources.
    #[must_use]
    pub fn fusion_score(&self) -> f64 {
        self.hits.iter().map(SourceHit::contribution).sum()
    }

    /// Sum of effective source weights, the divisor of the source boost.
    #[must_use]
    pub fn source_weight(&self) -> f64 {
        self.hits.iter().map(|hit| hit.weight).sum()
    }

    #[must_use]
    pub fn id(&self) -> &CanonicalId {
        &self.item.id
    }

    #[must_use]
    pub fn source_ids(&self) -> Vec<String> {
        self.hits.iter().map(|hit| hit.source_id.clone()).collect()
    }
}

/// One line of a produced list, renderable without re-querying providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: CanonicalId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
    pub score: f64,
    pub sources: Vec<String>,
    pub why: String,
    pub new_entry: bool,
}

/// Where a source's items came from during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Live,
    Snapshot,
    Failed,
}

impl SourceOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Snapshot => "snapshot",
            Self::Failed => "failed",
        }
    }
}

/// Per-source outcome recorded in the output header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub origin: SourceOrigin,
    pub items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate list statistics recorded alongside the items: pool counts plus
/// the selector's own metrics, so operators see what the run did without
/// consulting logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListStats {
    pub pool_size: usize,
    pub scorable: usize,
    pub new_entries: usize,
    pub new_entrant_ratio: f64,
    pub overlap_ratio: f64,
    pub core_size: usize,
    pub overlap_cap: usize,
    pub distinct_genres: usize,
}

/// The persisted product of one list run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOutput {
    pub list_id: String,
    pub name: String,
    pub kind: MediaKind,
    pub generated_at: DateTime<Utc>,
    pub period_key: String,
    pub strategy: StrategyParams,
    pub items: Vec<RankedItem>,
    pub sources: Vec<SourceReport>,
    pub stats: ListStats,
}

impl ListOutput {
    /// Normalized signature: the ordered item ids plus the strategy
    /// parameters that affect ranking. Timestamps, scores, rationale text
    /// and per-source provenance are deliberately excluded, so a re-run that
    /// lands on the same selection is a no-op for the writer even when its
    /// score components drifted.
    #[must_use]
    pub fn signature(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let mut put = |bytes: &[u8]| {
            hasher.update(bytes);
            hasher.update(&[0x1f]);
        };

        put(self.list_id.as_bytes());
        put(self.kind.as_str().as_bytes());
        for item in &self.items {
            put(item.id.as_str().as_bytes());
        }

        let strategy = &self.strategy;
        put(strategy.rotation.as_str().as_bytes());
        for value in [
            strategy.stable_core_ratio,
            strategy.max_overlap_ratio,
            strategy.new_entrant_min_ratio,
            strategy.core_reinforce_boost,
            strategy.exploration_jitter,
            strategy.novelty_rotation_weight,
            strategy.new_entry_priority_boost,
            strategy.new_boost,
            strategy.aging_per_day,
            strategy.aging_max,
            strategy.seen_penalty,
            strategy.exposure_penalty_per_show,
            strategy.exposure_penalty_cap,
            strategy.duplicate_penalty_per_hit,
            strategy.global_score_weight,
            strategy.popularity_weight,
            strategy.recency_popularity_weight,
            strategy.snapshot_weight_factor,
        ] {
            put(&value.to_bits().to_le_bytes());
        }
        for value in [
            strategy.top_window,
            strategy.max_primary_genre_top,
            strategy.max_per_decade_top,
            strategy.max_per_franchise_top,
        ] {
            put(&value.to_le_bytes());
        }
        put(&strategy.reference_year.to_le_bytes());

        hasher.digest()
    }

    /// Item ids in ranked order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<CanonicalId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}
