//! Quality scoring and score-component assembly.
//!
//! Movies score by rating weighted with vote volume; series score by
//! recency. On top of the base score every candidate gets a source boost
//! from fusion, a novelty boost from per-list history, and penalties for
//! exposure and same-run duplication. Movies that still have no usable
//! rating after enrichment are unscorable and leave the pool.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clients::TmdbClient;
use crate::lists::StrategyParams;
use crate::model::{Candidate, CanonicalId, MediaKind, QualitySignal};
use crate::pipeline::fuse::FusedPool;
use crate::pipeline::{ListJob, novelty};
use crate::store::history::StateStore;
use crate::store::ratings::RatingCache;
use crate::util::error::ErrorKind;

/// A candidate with every score component resolved.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub base_score: f64,
    pub source_boost: f64,
    pub novelty_boost: f64,
    pub exposure_penalty: f64,
    pub duplicate_penalty: f64,
    pub is_new: bool,
}

impl ScoredCandidate {
    #[must_use]
    pub fn total_score(&self) -> f64 {
        self.base_score + self.source_boost + self.novelty_boost
            - self.exposure_penalty
            - self.duplicate_penalty
    }

    #[must_use]
    pub fn id(&self) -> &CanonicalId {
        self.candidate.id()
    }
}

/// Scored pool ordered by total score, plus the pre-threshold pool size
/// for the output stats.
#[derive(Debug, Clone, Default)]
pub struct ScoredPool {
    pub candidates: Vec<ScoredCandidate>,
    pub pool_size: usize,
}

/// Base quality score per media kind. `None` marks an unscorable item:
/// a movie with no usable rating even after enrichment.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn base_score(
    kind: MediaKind,
    quality: &QualitySignal,
    year: Option<i32>,
    strategy: &StrategyParams,
) -> Option<f64> {
    match kind {
        MediaKind::Movie => {
            if !quality.has_rating() {
                return None;
            }
            let rating = quality.rating?;
            let vote_weight = ((quality.votes + 10) as f64).log10();
            let popularity = strategy.popularity_weight * (quality.popularity + 1.0).log10();
            Some(rating * vote_weight + popularity)
        }
        MediaKind::Series => {
            // Unknown years sit at the reference year and contribute nothing.
            let recency =
                f64::from(year.unwrap_or(strategy.reference_year) - strategy.reference_year);
            let popularity =
                strategy.recency_popularity_weight * (quality.popularity + 1.0).log10();
            Some(recency + popularity)
        }
    }
}

/// Source boost: fusion score normalized by accumulated source weight, so
/// strong agreement is rewarded without compounding the raw magnitude.
#[must_use]
pub fn source_boost(candidate: &Candidate, strategy: &StrategyParams) -> f64 {
    let weight = candidate.source_weight();
    if weight > 0.0 {
        candidate.fusion_score() / weight * strategy.global_score_weight
    } else {
        0.0
    }
}

/// Sort scored candidates by total score descending, id ascending.
pub fn sort_scored(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.total_score()
            .partial_cmp(&a.total_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id().cmp(b.id()))
    });
}

#[async_trait]
pub(crate) trait ScoreStage: Send + Sync {
    async fn score(&self, job: &ListJob, pool: FusedPool) -> Result<ScoredPool>;
}

/// The production score stage: enriches missing movie ratings through the
/// rating cache and TMDB, applies the list thresholds, then assembles every
/// score component.
pub(crate) struct EnrichScoreStage {
    state: Arc<StateStore>,
    ratings: Arc<RatingCache>,
    tmdb: Option<Arc<TmdbClient>>,
    lookup_budget: usize,
}

impl EnrichScoreStage {
    pub(crate) fn new(
        state: Arc<StateStore>,
        ratings: Arc<RatingCache>,
        tmdb: Option<Arc<TmdbClient>>,
        lookup_budget: usize,
    ) -> Self {
        Self {
            state,
            ratings,
            tmdb,
            lookup_budget,
        }
    }

    /// Fill in missing movie ratings, spending the lookup budget in pool
    /// order so the strongest candidates get enriched first. Lookup failures
    /// leave the item unrated; only auth failures abort.
    async fn enrich(&self, job: &ListJob, pool: &mut FusedPool) -> Result<()> {
        if job.list.kind != MediaKind::Movie {
            return Ok(());
        }
        let mut lookups_left = self.lookup_budget;
        for candidate in &mut pool.candidates {
            if candidate.item.quality.has_rating() {
                continue;
            }
            if let Some(cached) = self.ratings.lookup(candidate.id(), job.now) {
                candidate.item.quality.merge(&cached);
                continue;
            }
            let Some(client) = self.tmdb.as_ref() else {
                return Ok(());
            };
            if lookups_left == 0 {
                debug!(list_id = %job.list.id, "rating lookup budget exhausted");
                return Ok(());
            }
            lookups_left -= 1;
            match client
                .find_by_imdb(job.list.kind, candidate.id().as_str())
                .await
            {
                Ok(found) => {
                    // A miss is cached too, as an empty signal.
                    let signal = found.unwrap_or_default();
                    self.ratings.store(candidate.id(), signal.clone(), job.now);
                    candidate.item.quality.merge(&signal);
                }
                Err(error) => {
                    if error.kind() == ErrorKind::Fatal {
                        return Err(error.into());
                    }
                    warn!(
                        id = %candidate.id(),
                        error = %error,
                        "rating enrichment failed; item stays unrated this run"
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreStage for EnrichScoreStage {
    async fn score(&self, job: &ListJob, mut pool: FusedPool) -> Result<ScoredPool> {
        self.enrich(job, &mut pool).await?;

        let history = self.state.history_view(&job.list.id);
        let exposure = self.state.exposure_view();
        let strategy = &job.strategy;
        let pool_size = pool.candidates.len();

        let mut candidates = Vec::with_capacity(pool_size);
        for candidate in pool.candidates {
            if job.list.thresholds.excludes(&candidate.item.quality) {
                continue;
            }
            let Some(base) = base_score(
                job.list.kind,
                &candidate.item.quality,
                candidate.item.year,
                strategy,
            ) else {
                continue;
            };
            let boost = source_boost(&candidate, strategy);
            let (novelty_value, is_new) =
                novelty::novelty_boost(history.get(candidate.id()), job.now, strategy);
            let shown = exposure.get(candidate.id()).copied().unwrap_or(0);
            let exposure_penalty = novelty::exposure_penalty(shown, strategy);
            let duplicate_penalty =
                novelty::duplicate_penalty(job.ledger.uses_of(candidate.id()), strategy);
            candidates.push(ScoredCandidate {
                candidate,
                base_score: base,
                source_boost: boost,
                novelty_boost: novelty_value,
                exposure_penalty,
                duplicate_penalty,
                is_new,
            });
        }
        sort_scored(&mut candidates);
        debug!(
            list_id = %job.list.id,
            pool_size,
            scorable = candidates.len(),
            "pool scored"
        );
        Ok(ScoredPool {
            candidates,
            pool_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use serde_json::json;
    use smallvec::smallvec;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::batch::RunLedger;
    use crate::clients::TmdbConfig;
    use crate::lists::{CurationMode, FilterDef, ListDef, ThresholdDef};
    use crate::model::{CatalogItem, SourceHit};

    fn strategy() -> StrategyParams {
        StrategyParams::preset(CurationMode::Balanced)
    }

    #[test]
    fn movie_score_weights_rating_by_vote_volume() {
        let params = strategy();
        let acclaimed = QualitySignal {
            rating: Some(8.0),
            votes: 990,
            popularity: 0.0,
        };
        // 8.0 * log10(1000) = 24
        let score = base_score(MediaKind::Movie, &acclaimed, Some(1994), &params).unwrap();
        assert!((score - 24.0).abs() < 1e-9);

        let obscure = QualitySignal {
            rating: Some(8.0),
            votes: 90,
            popularity: 0.0,
        };
        let obscure_score = base_score(MediaKind::Movie, &obscure, Some(1994), &params).unwrap();
        assert!(score > obscure_score);
    }

    #[test]
    fn unrated_movies_are_unscorable() {
        let params = strategy();
        let unrated = QualitySignal {
            rating: None,
            votes: 500,
            popularity: 40.0,
        };
        assert!(base_score(MediaKind::Movie, &unrated, Some(2024), &params).is_none());
    }

    #[test]
    fn series_score_by_recency_and_popularity() {
        let params = strategy(); // reference year 2000
        let fresh = QualitySignal {
            rating: None,
            votes: 0,
            popularity: 9.0,
        };
        let score = base_score(MediaKind::Series, &fresh, Some(2023), &params).unwrap();
        // 23 + 2.0 * log10(10) = 25
        assert!((score - 25.0).abs() < 1e-9);

        let undated = base_score(MediaKind::Series, &fresh, None, &params).unwrap();
        assert!((undated - 2.0).abs() < 1e-9);
    }

    #[test]
    fn source_boost_normalizes_by_accumulated_weight() {
        let params = strategy(); // global_score_weight 0.25
        let candidate = Candidate {
            item: CatalogItem {
                id: CanonicalId::parse("tt0000001").unwrap(),
                title: "A".to_string(),
                year: None,
                genres: BTreeSet::new(),
                quality: QualitySignal::default(),
            },
            hits: smallvec![
                SourceHit {
                    source_id: "a".to_string(),
                    rank: 0,
                    total: 10,
                    weight: 1.0,
                },
                SourceHit {
                    source_id: "b".to_string(),
                    rank: 0,
                    total: 10,
                    weight: 1.0,
                },
            ],
        };
        // fusion 200, weight 2 -> 100 * 0.25
        assert!((source_boost(&candidate, &params) - 25.0).abs() < 1e-9);
    }

    fn movie(id: &str, rating: Option<f64>, votes: u64) -> Candidate {
        Candidate {
            item: CatalogItem {
                id: CanonicalId::parse(id).unwrap(),
                title: format!("Movie {id}"),
                year: Some(2015),
                genres: BTreeSet::new(),
                quality: QualitySignal {
                    rating,
                    votes,
                    popularity: 5.0,
                },
            },
            hits: smallvec![SourceHit {
                source_id: "main".to_string(),
                rank: 0,
                total: 10,
                weight: 1.0,
            }],
        }
    }

    fn job_for(thresholds: ThresholdDef) -> ListJob {
        ListJob {
            run_id: Uuid::now_v7(),
            list: ListDef {
                id: "test-list".to_string(),
                name: "Test".to_string(),
                kind: MediaKind::Movie,
                sources: Vec::new(),
                filters: FilterDef::default(),
                thresholds,
                mode: CurationMode::Balanced,
                strategy: None,
                final_size: 10,
            },
            strategy: strategy(),
            period_key: "2025-W30".to_string(),
            now: Utc::now(),
            ledger: Arc::new(RunLedger::default()),
        }
    }

    fn stage_for(dir: &tempfile::TempDir, tmdb: Option<Arc<TmdbClient>>) -> EnrichScoreStage {
        EnrichScoreStage::new(
            Arc::new(StateStore::new(dir.path().join("state"))),
            Arc::new(RatingCache::new(
                dir.path().join("ratings.json"),
                std::time::Duration::from_secs(3600),
            )),
            tmdb,
            2,
        )
    }

    #[tokio::test]
    async fn enrichment_fills_missing_ratings_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/find/tt0000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "movie_results": [
                    { "id": 1, "vote_average": 7.4, "vote_count": 800, "popularity": 10.0 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tmdb = Arc::new(
            TmdbClient::new(&TmdbConfig {
                base_url: server.uri(),
                api_key: "k".to_string(),
                connect_timeout: std::time::Duration::from_millis(500),
                total_timeout: std::time::Duration::from_secs(2),
            })
            .unwrap(),
        );
        let stage = stage_for(&dir, Some(tmdb));
        let job = job_for(ThresholdDef::default());

        let pool = FusedPool {
            candidates: vec![movie("tt0000001", None, 0), movie("tt0000002", Some(6.5), 300)],
        };
        let scored = stage.score(&job, pool).await.unwrap();

        assert_eq!(scored.pool_size, 2);
        assert_eq!(scored.candidates.len(), 2);
        let enriched = scored
            .candidates
            .iter()
            .find(|c| c.id().as_str() == "tt0000001")
            .unwrap();
        assert_eq!(enriched.candidate.item.quality.rating, Some(7.4));

        // Second pass is served from the rating cache, not the mock.
        let pool = FusedPool {
            candidates: vec![movie("tt0000001", None, 0)],
        };
        let again = stage.score(&job, pool).await.unwrap();
        assert_eq!(again.candidates[0].candidate.item.quality.rating, Some(7.4));
    }

    #[tokio::test]
    async fn rating_misses_are_cached_and_movies_stay_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/find/tt0000003"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "movie_results": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tmdb = Arc::new(
            TmdbClient::new(&TmdbConfig {
                base_url: server.uri(),
                api_key: "k".to_string(),
                connect_timeout: std::time::Duration::from_millis(500),
                total_timeout: std::time::Duration::from_secs(2),
            })
            .unwrap(),
        );
        let stage = stage_for(&dir, Some(tmdb));
        let job = job_for(ThresholdDef::default());

        for _ in 0..2 {
            let pool = FusedPool {
                candidates: vec![movie("tt0000003", None, 0)],
            };
            let scored = stage.score(&job, pool).await.unwrap();
            assert_eq!(scored.pool_size, 1);
            assert!(scored.candidates.is_empty(), "unrated movie must drop");
        }
    }

    #[tokio::test]
    async fn thresholds_exclude_before_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, None);
        let job = job_for(ThresholdDef {
            min_rating: Some(7.0),
            min_votes: Some(100),
            max_votes: None,
        });

        let pool = FusedPool {
            candidates: vec![
                movie("tt0000001", Some(8.0), 500),
                movie("tt0000002", Some(6.0), 500),
                movie("tt0000003", Some(8.0), 50),
            ],
        };
        let scored = stage.score(&job, pool).await.unwrap();

        assert_eq!(scored.pool_size, 3);
        assert_eq!(scored.candidates.len(), 1);
        assert_eq!(scored.candidates[0].id().as_str(), "tt0000001");
    }

    #[tokio::test]
    async fn duplicate_penalty_follows_the_run_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, None);
        let job = job_for(ThresholdDef::default());
        job.ledger
            .note_selected(&[CanonicalId::parse("tt0000001").unwrap()]);

        let pool = FusedPool {
            candidates: vec![movie("tt0000001", Some(7.0), 500)],
        };
        let scored = stage.score(&job, pool).await.unwrap();

        // balanced preset: 5.0 per sibling-list hit
        assert!((scored.candidates[0].duplicate_penalty - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scored_pool_is_ordered_by_total_score() {
        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, None);
        let job = job_for(ThresholdDef::default());

        let pool = FusedPool {
            candidates: vec![
                movie("tt0000001", Some(5.0), 100),
                movie("tt0000002", Some(9.0), 5000),
            ],
        };
        let scored = stage.score(&job, pool).await.unwrap();

        assert_eq!(scored.candidates[0].id().as_str(), "tt0000002");
        assert!(scored.candidates[0].total_score() > scored.candidates[1].total_score());
    }
}
