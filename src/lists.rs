//! List configuration: the JSON file describing which lists to curate, the
//! sources feeding each one, and the strategy parameters steering selection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CatalogItem, MediaKind, QualitySignal};
use crate::util::time;

#[derive(Debug, Error)]
pub enum ListsError {
    #[error("failed to read list configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse list configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid list configuration: {0}")]
    Invalid(String),
}

/// Named bundle of stability/diversity/novelty defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurationMode {
    Stable,
    #[default]
    Balanced,
    Fresh,
}

impl CurationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Balanced => "balanced",
            Self::Fresh => "fresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Trakt,
    Tmdb,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trakt => "trakt",
            Self::Tmdb => "tmdb",
        }
    }
}

/// How often the rotation jitter reseeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPeriod {
    Daily,
    Weekly,
}

impl RotationPeriod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    /// Key identifying the rotation period `at` falls into: the calendar
    /// day or the ISO week.
    #[must_use]
    pub fn period_key(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Daily => time::daily_period_key(at),
            Self::Weekly => time::weekly_period_key(at),
        }
    }
}

/// One weighted catalog source feeding a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceDef {
    pub id: String,
    pub provider: Provider,
    /// Provider-relative endpoint path, e.g. `movies/trending` or
    /// `discover/movie`.
    pub path: String,
    #[serde(default = "default_source_weight")]
    pub weight: f64,
    #[serde(default = "default_candidate_pages")]
    pub candidate_pages: u32,
}

fn default_source_weight() -> f64 {
    1.0
}

fn default_candidate_pages() -> u32 {
    2
}

/// Intake filters applied while fusing a source's items into the pool.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FilterDef {
    #[serde(default)]
    pub year_min: Option<i32>,
    #[serde(default)]
    pub year_max: Option<i32>,
    #[serde(default)]
    pub genres_include: Vec<String>,
    #[serde(default)]
    pub genres_exclude: Vec<String>,
}

impl FilterDef {
    /// Items with an unknown year fail any configured year bound.
    #[must_use]
    pub fn matches(&self, item: &CatalogItem) -> bool {
        if self.year_min.is_some() || self.year_max.is_some() {
            let Some(year) = item.year else {
                return false;
            };
            if self.year_min.is_some_and(|min| year < min) {
                return false;
            }
            if self.year_max.is_some_and(|max| year > max) {
                return false;
            }
        }
        if !self.genres_include.is_empty() {
            let any = self
                .genres_include
                .iter()
                .any(|genre| item.genres.contains(&genre.to_lowercase()));
            if !any {
                return false;
            }
        }
        if self
            .genres_exclude
            .iter()
            .any(|genre| item.genres.contains(&genre.to_lowercase()))
        {
            return false;
        }
        true
    }

    /// Canonical string for snapshot identity: two filters with the same
    /// semantics produce the same fingerprint regardless of declaration
    /// order or case.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut include: Vec<String> = self
            .genres_include
            .iter()
            .map(|genre| genre.to_lowercase())
            .collect();
        include.sort_unstable();
        let mut exclude: Vec<String> = self
            .genres_exclude
            .iter()
            .map(|genre| genre.to_lowercase())
            .collect();
        exclude.sort_unstable();
        let bound = |value: Option<i32>| value.map_or_else(|| "*".to_string(), |y| y.to_string());
        format!(
            "y:{}..{}|in:{}|ex:{}",
            bound(self.year_min),
            bound(self.year_max),
            include.join(","),
            exclude.join(",")
        )
    }
}

/// Hard exclusions applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThresholdDef {
    #[serde(default)]
    pub min_rating: Option<f64>,
    #[serde(default)]
    pub min_votes: Option<u64>,
    #[serde(default)]
    pub max_votes: Option<u64>,
}

impl ThresholdDef {
    #[must_use]
    pub fn excludes(&self, quality: &QualitySignal) -> bool {
        if let Some(min) = self.min_rating {
            match quality.rating {
                Some(rating) if rating >= min => {}
                _ => return true,
            }
        }
        if self.min_votes.is_some_and(|min| quality.votes < min) {
            return true;
        }
        if self.max_votes.is_some_and(|max| quality.votes > max) {
            return true;
        }
        false
    }
}

/// Fully resolved strategy parameters for one list. Serialized into the
/// list output so consumers can see what produced the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub stable_core_ratio: f64,
    pub max_overlap_ratio: f64,
    pub new_entrant_min_ratio: f64,
    pub rotation: RotationPeriod,
    pub core_reinforce_boost: f64,
    pub exploration_jitter: f64,
    pub novelty_rotation_weight: f64,
    pub new_entry_priority_boost: f64,
    pub top_window: usize,
    pub max_primary_genre_top: usize,
    pub max_per_decade_top: usize,
    pub max_per_franchise_top: usize,
    pub new_boost: f64,
    pub aging_per_day: f64,
    pub aging_max: f64,
    pub seen_penalty: f64,
    pub exposure_penalty_per_show: f64,
    pub exposure_penalty_cap: f64,
    pub duplicate_penalty_per_hit: f64,
    pub global_score_weight: f64,
    pub popularity_weight: f64,
    pub recency_popularity_weight: f64,
    pub reference_year: i32,
    pub snapshot_weight_factor: f64,
}

impl StrategyParams {
    #[must_use]
    pub fn preset(mode: CurationMode) -> Self {
        let balanced = Self {
            stable_core_ratio: 0.3,
            max_overlap_ratio: 0.6,
            new_entrant_min_ratio: 0.2,
            rotation: RotationPeriod::Weekly,
            core_reinforce_boost: 25.0,
            exploration_jitter: 6.0,
            novelty_rotation_weight: 1.5,
            new_entry_priority_boost: 15.0,
            top_window: 10,
            max_primary_genre_top: 3,
            max_per_decade_top: 4,
            max_per_franchise_top: 1,
            new_boost: 8.0,
            aging_per_day: 0.1,
            aging_max: 6.0,
            seen_penalty: 0.4,
            exposure_penalty_per_show: 1.0,
            exposure_penalty_cap: 8.0,
            duplicate_penalty_per_hit: 5.0,
            global_score_weight: 0.25,
            popularity_weight: 1.5,
            recency_popularity_weight: 2.0,
            reference_year: 2000,
            snapshot_weight_factor: 0.7,
        };
        match mode {
            CurationMode::Balanced => balanced,
            CurationMode::Stable => Self {
                stable_core_ratio: 0.5,
                max_overlap_ratio: 0.8,
                new_entrant_min_ratio: 0.1,
                exploration_jitter: 4.0,
                novelty_rotation_weight: 1.0,
                new_entry_priority_boost: 10.0,
                max_primary_genre_top: 4,
                max_per_decade_top: 5,
                new_boost: 5.0,
                aging_per_day: 0.05,
                aging_max: 4.0,
                seen_penalty: 0.2,
                ..balanced
            },
            CurationMode::Fresh => Self {
                stable_core_ratio: 0.15,
                max_overlap_ratio: 0.4,
                new_entrant_min_ratio: 0.35,
                rotation: RotationPeriod::Daily,
                exploration_jitter: 9.0,
                novelty_rotation_weight: 2.5,
                new_entry_priority_boost: 25.0,
                new_boost: 12.0,
                aging_per_day: 0.2,
                aging_max: 10.0,
                seen_penalty: 0.8,
                ..balanced
            },
        }
    }

    /// Resolution order for every parameter: list override, then file-level
    /// defaults, then the mode preset.
    #[must_use]
    pub fn resolve(
        mode: CurationMode,
        defaults: Option<&StrategyOverride>,
        local: Option<&StrategyOverride>,
    ) -> Self {
        let preset = Self::preset(mode);
        let empty = StrategyOverride::default();
        let global = defaults.unwrap_or(&empty);
        let local = local.unwrap_or(&empty);
        Self {
            stable_core_ratio: pick(
                local.stable_core_ratio,
                global.stable_core_ratio,
                preset.stable_core_ratio,
            ),
            max_overlap_ratio: pick(
                local.max_overlap_ratio,
                global.max_overlap_ratio,
                preset.max_overlap_ratio,
            ),
            new_entrant_min_ratio: pick(
                local.new_entrant_min_ratio,
                global.new_entrant_min_ratio,
                preset.new_entrant_min_ratio,
            ),
            rotation: pick(local.rotation, global.rotation, preset.rotation),
            core_reinforce_boost: pick(
                local.core_reinforce_boost,
                global.core_reinforce_boost,
                preset.core_reinforce_boost,
            ),
            exploration_jitter: pick(
                local.exploration_jitter,
                global.exploration_jitter,
                preset.exploration_jitter,
            ),
            novelty_rotation_weight: pick(
                local.novelty_rotation_weight,
                global.novelty_rotation_weight,
                preset.novelty_rotation_weight,
            ),
            new_entry_priority_boost: pick(
                local.new_entry_priority_boost,
                global.new_entry_priority_boost,
                preset.new_entry_priority_boost,
            ),
            top_window: pick(local.top_window, global.top_window, preset.top_window),
            max_primary_genre_top: pick(
                local.max_primary_genre_top,
                global.max_primary_genre_top,
                preset.max_primary_genre_top,
            ),
            max_per_decade_top: pick(
                local.max_per_decade_top,
                global.max_per_decade_top,
                preset.max_per_decade_top,
            ),
            max_per_franchise_top: pick(
                local.max_per_franchise_top,
                global.max_per_franchise_top,
                preset.max_per_franchise_top,
            ),
            new_boost: pick(local.new_boost, global.new_boost, preset.new_boost),
            aging_per_day: pick(local.aging_per_day, global.aging_per_day, preset.aging_per_day),
            aging_max: pick(local.aging_max, global.aging_max, preset.aging_max),
            seen_penalty: pick(local.seen_penalty, global.seen_penalty, preset.seen_penalty),
            exposure_penalty_per_show: pick(
                local.exposure_penalty_per_show,
                global.exposure_penalty_per_show,
                preset.exposure_penalty_per_show,
            ),
            exposure_penalty_cap: pick(
                local.exposure_penalty_cap,
                global.exposure_penalty_cap,
                preset.exposure_penalty_cap,
            ),
            duplicate_penalty_per_hit: pick(
                local.duplicate_penalty_per_hit,
                global.duplicate_penalty_per_hit,
                preset.duplicate_penalty_per_hit,
            ),
            global_score_weight: pick(
                local.global_score_weight,
                global.global_score_weight,
                preset.global_score_weight,
            ),
            popularity_weight: pick(
                local.popularity_weight,
                global.popularity_weight,
                preset.popularity_weight,
            ),
            recency_popularity_weight: pick(
                local.recency_popularity_weight,
                global.recency_popularity_weight,
                preset.recency_popularity_weight,
            ),
            reference_year: pick(
                local.reference_year,
                global.reference_year,
                preset.reference_year,
            ),
            snapshot_weight_factor: pick(
                local.snapshot_weight_factor,
                global.snapshot_weight_factor,
                preset.snapshot_weight_factor,
            ),
        }
    }
}

fn pick<T: Copy>(local: Option<T>, global: Option<T>, preset: T) -> T {
    local.or(global).unwrap_or(preset)
}

/// Partial strategy override, usable at file level (`defaults`) or per list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StrategyOverride {
    #[serde(default)]
    pub stable_core_ratio: Option<f64>,
    #[serde(default)]
    pub max_overlap_ratio: Option<f64>,
    #[serde(default)]
    pub new_entrant_min_ratio: Option<f64>,
    #[serde(default)]
    pub rotation: Option<RotationPeriod>,
    #[serde(default)]
    pub core_reinforce_boost: Option<f64>,
    #[serde(default)]
    pub exploration_jitter: Option<f64>,
    #[serde(default)]
    pub novelty_rotation_weight: Option<f64>,
    #[serde(default)]
    pub new_entry_priority_boost: Option<f64>,
    #[serde(default)]
    pub top_window: Option<usize>,
    #[serde(default)]
    pub max_primary_genre_top: Option<usize>,
    #[serde(default)]
    pub max_per_decade_top: Option<usize>,
    #[serde(default)]
    pub max_per_franchise_top: Option<usize>,
    #[serde(default)]
    pub new_boost: Option<f64>,
    #[serde(default)]
    pub aging_per_day: Option<f64>,
    #[serde(default)]
    pub aging_max: Option<f64>,
    #[serde(default)]
    pub seen_penalty: Option<f64>,
    #[serde(default)]
    pub exposure_penalty_per_show: Option<f64>,
    #[serde(default)]
    pub exposure_penalty_cap: Option<f64>,
    #[serde(default)]
    pub duplicate_penalty_per_hit: Option<f64>,
    #[serde(default)]
    pub global_score_weight: Option<f64>,
    #[serde(default)]
    pub popularity_weight: Option<f64>,
    #[serde(default)]
    pub recency_popularity_weight: Option<f64>,
    #[serde(default)]
    pub reference_year: Option<i32>,
    #[serde(default)]
    pub snapshot_weight_factor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDef {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub sources: Vec<SourceDef>,
    #[serde(default)]
    pub filters: FilterDef,
    #[serde(default)]
    pub thresholds: ThresholdDef,
    #[serde(default)]
    pub mode: CurationMode,
    #[serde(default)]
    pub strategy: Option<StrategyOverride>,
    pub final_size: usize,
}

impl ListDef {
    #[must_use]
    pub fn strategy(&self, defaults: Option<&StrategyOverride>) -> StrategyParams {
        StrategyParams::resolve(self.mode, defaults, self.strategy.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListsFile {
    #[serde(default)]
    pub defaults: Option<StrategyOverride>,
    pub lists: Vec<ListDef>,
}

impl ListsFile {
    /// リスト定義ファイルを読み込み、構造と値を検証する。
    ///
    /// # Errors
    /// ファイルの読み込み・パースに失敗した場合、または検証に通らない定義が
    /// 含まれる場合は [`ListsError`] を返す。
    pub fn load(path: &Path) -> Result<Self, ListsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ListsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: Self = serde_json::from_str(&raw)?;
        parsed.validate()?;
        Ok(parsed)
    }

    #[must_use]
    pub fn uses_provider(&self, provider: Provider) -> bool {
        self.lists
            .iter()
            .any(|list| list.sources.iter().any(|source| source.provider == provider))
    }

    fn validate(&self) -> Result<(), ListsError> {
        if self.lists.is_empty() {
            return Err(ListsError::Invalid("no lists defined".to_string()));
        }
        let mut list_ids = HashSet::new();
        for list in &self.lists {
            if list.id.is_empty() || !list.id.chars().all(is_id_char) {
                return Err(ListsError::Invalid(format!(
                    "list id '{}' must be non-empty lowercase alphanumeric with '-' or '_'",
                    list.id
                )));
            }
            if !list_ids.insert(list.id.as_str()) {
                return Err(ListsError::Invalid(format!(
                    "duplicate list id '{}'",
                    list.id
                )));
            }
            if list.final_size == 0 {
                return Err(ListsError::Invalid(format!(
                    "list '{}': final_size must be at least 1",
                    list.id
                )));
            }
            if list.sources.is_empty() {
                return Err(ListsError::Invalid(format!(
                    "list '{}' has no sources",
                    list.id
                )));
            }
            let mut source_ids = HashSet::new();
            for source in &list.sources {
                if source.id.is_empty() {
                    return Err(ListsError::Invalid(format!(
                        "list '{}' has a source with an empty id",
                        list.id
                    )));
                }
                if !source_ids.insert(source.id.as_str()) {
                    return Err(ListsError::Invalid(format!(
                        "list '{}': duplicate source id '{}'",
                        list.id, source.id
                    )));
                }
                if source.path.is_empty() {
                    return Err(ListsError::Invalid(format!(
                        "list '{}': source '{}' has an empty path",
                        list.id, source.id
                    )));
                }
                if source.weight <= 0.0 {
                    return Err(ListsError::Invalid(format!(
                        "list '{}': source '{}' weight must be positive",
                        list.id, source.id
                    )));
                }
                if source.candidate_pages == 0 {
                    return Err(ListsError::Invalid(format!(
                        "list '{}': source '{}' candidate_pages must be at least 1",
                        list.id, source.id
                    )));
                }
            }
            let strategy = list.strategy(self.defaults.as_ref());
            for (name, value) in [
                ("stable_core_ratio", strategy.stable_core_ratio),
                ("max_overlap_ratio", strategy.max_overlap_ratio),
                ("new_entrant_min_ratio", strategy.new_entrant_min_ratio),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ListsError::Invalid(format!(
                        "list '{}': {name} must be within 0..=1",
                        list.id
                    )));
                }
            }
            if strategy.top_window == 0 {
                return Err(ListsError::Invalid(format!(
                    "list '{}': top_window must be at least 1",
                    list.id
                )));
            }
        }
        Ok(())
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}
