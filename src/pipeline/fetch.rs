//! Source fetch stage: pulls ranked catalog pages per configured source,
//! resolves entries to canonical ids, and applies the list's intake
//! filters before ranks are assigned downstream.
//!
//! A failing source falls back to its last snapshot at reduced weight; a
//! source with no usable snapshot is reported as failed and the list runs
//! on whatever remains. Only auth and config errors abort the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::clients::{CatalogPage, ProviderError, TmdbClient, TraktClient};
use crate::lists::{Provider, SourceDef};
use crate::model::{CatalogItem, MediaKind, SourceOrigin, SourceReport};
use crate::pipeline::ListJob;
use crate::pipeline::fuse::SourceBatch;
use crate::resolve::IdentityResolver;
use crate::store::snapshots::{self, SnapshotStore, SourceSnapshot};
use crate::util::error::{ErrorKind, classify_error, is_fatal};
use crate::util::retry::RetryConfig;

/// Everything the fetch stage hands downstream: one batch per usable
/// source plus a report per configured source, usable or not.
#[derive(Debug)]
pub(crate) struct FetchOutcome {
    pub(crate) batches: Vec<SourceBatch>,
    pub(crate) reports: Vec<SourceReport>,
}

#[async_trait]
pub(crate) trait FetchStage: Send + Sync {
    async fn fetch(&self, job: &ListJob) -> Result<FetchOutcome>;
}

pub(crate) struct ProviderFetchStage {
    trakt: Option<Arc<TraktClient>>,
    tmdb: Option<Arc<TmdbClient>>,
    resolver: Arc<IdentityResolver>,
    snapshots: Arc<SnapshotStore>,
    retry: RetryConfig,
    /// Pause after every provider request, across pages, sources, and lists.
    pacing: Duration,
}

impl ProviderFetchStage {
    pub(crate) fn new(
        trakt: Option<Arc<TraktClient>>,
        tmdb: Option<Arc<TmdbClient>>,
        resolver: Arc<IdentityResolver>,
        snapshots: Arc<SnapshotStore>,
        retry: RetryConfig,
        pacing: Duration,
    ) -> Self {
        Self {
            trakt,
            tmdb,
            resolver,
            snapshots,
            retry,
            pacing,
        }
    }

    async fn fetch_page(
        &self,
        source: &SourceDef,
        kind: MediaKind,
        page: u32,
    ) -> Result<CatalogPage> {
        match source.provider {
            Provider::Trakt => {
                let client = self
                    .trakt
                    .as_deref()
                    .context("trakt client is not configured")?;
                Ok(client.fetch_catalog_page(&source.path, page).await?)
            }
            Provider::Tmdb => {
                let client = self
                    .tmdb
                    .as_deref()
                    .context("tmdb client is not configured")?;
                Ok(client.fetch_catalog_page(&source.path, kind, page).await?)
            }
        }
    }

    /// Fetch one page, retrying transient failures with backoff. A
    /// server-provided wait hint overrides the computed delay.
    async fn page_with_retry(
        &self,
        source: &SourceDef,
        kind: MediaKind,
        page: u32,
    ) -> Result<CatalogPage> {
        let mut attempt = 0;

        loop {
            match self.fetch_page(source, kind, page).await {
                Ok(fetched) => {
                    if attempt > 0 {
                        info!(source_id = %source.id, page, attempt, "page fetch succeeded after retry");
                    }
                    return Ok(fetched);
                }
                Err(error) => {
                    attempt += 1;

                    if classify_error(&error) != ErrorKind::Retryable {
                        return Err(error);
                    }
                    if !self.retry.can_retry(attempt) {
                        warn!(
                            source_id = %source.id,
                            page,
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            "page fetch failed after all retries"
                        );
                        return Err(error);
                    }

                    let hint = error
                        .downcast_ref::<ProviderError>()
                        .and_then(ProviderError::retry_after);
                    let delay = self.retry.delay_with_hint(attempt, hint);
                    warn!(
                        source_id = %source.id,
                        page,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "page fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Live fetch for one source: pages until the provider reports the
    /// end or the page budget runs out, then resolves and filters.
    /// Returns the kept items plus the raw fetched count.
    async fn fetch_live(&self, job: &ListJob, source: &SourceDef) -> Result<(Vec<CatalogItem>, usize)> {
        let mut raw_items = Vec::new();
        for page in 1..=source.candidate_pages {
            let fetched = self.page_with_retry(source, job.list.kind, page).await?;
            let has_more = fetched.has_more;
            raw_items.extend(fetched.items);
            tokio::time::sleep(self.pacing).await;
            if !has_more {
                break;
            }
        }

        let fetched_count = raw_items.len();
        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            let Some(id) = self.resolver.resolve(job.list.kind, &raw.ids, job.now).await? else {
                continue;
            };
            let item = CatalogItem {
                id,
                title: raw.title,
                year: raw.year,
                genres: raw.genres.into_iter().collect(),
                quality: raw.quality,
            };
            // Intake filters run before fusion so ranks are assigned
            // within the filtered list, not the raw provider page.
            if !job.list.filters.matches(&item) {
                continue;
            }
            items.push(item);
        }
        Ok((items, fetched_count))
    }
}

#[async_trait]
impl FetchStage for ProviderFetchStage {
    async fn fetch(&self, job: &ListJob) -> Result<FetchOutcome> {
        let fingerprint = job.list.filters.fingerprint();
        let mut batches = Vec::with_capacity(job.list.sources.len());
        let mut reports = Vec::with_capacity(job.list.sources.len());

        for source in &job.list.sources {
            let key = snapshots::meta_key(source.provider.as_str(), &source.path, &fingerprint);

            match self.fetch_live(job, source).await {
                Ok((items, fetched)) => {
                    debug!(
                        list_id = %job.list.id,
                        source_id = %source.id,
                        fetched,
                        kept = items.len(),
                        "live fetch complete"
                    );
                    let snapshot = SourceSnapshot {
                        provider: source.provider.as_str().to_string(),
                        path: source.path.clone(),
                        filters: fingerprint.clone(),
                        saved_at: job.now,
                        items: items.clone(),
                    };
                    if let Err(error) = self.snapshots.save(&key, &snapshot) {
                        warn!(
                            source_id = %source.id,
                            error = %error,
                            "failed to save source snapshot"
                        );
                    }
                    reports.push(SourceReport {
                        source_id: source.id.clone(),
                        origin: SourceOrigin::Live,
                        items: items.len(),
                        detail: (fetched != items.len()).then(|| format!("{fetched} fetched")),
                    });
                    batches.push(SourceBatch {
                        source_id: source.id.clone(),
                        weight: source.weight,
                        items,
                    });
                }
                Err(error) => {
                    if is_fatal(&error) {
                        return Err(error.context(format!("source '{}' failed", source.id)));
                    }
                    warn!(
                        list_id = %job.list.id,
                        source_id = %source.id,
                        error = format!("{error:#}"),
                        "live fetch failed, trying snapshot"
                    );

                    if let Some(snapshot) = self.snapshots.load_fresh(&key, job.now) {
                        info!(
                            source_id = %source.id,
                            saved_at = %snapshot.saved_at,
                            count = snapshot.items.len(),
                            "replaying source snapshot at reduced weight"
                        );
                        reports.push(SourceReport {
                            source_id: source.id.clone(),
                            origin: SourceOrigin::Snapshot,
                            items: snapshot.items.len(),
                            detail: Some(format!("saved {}", snapshot.saved_at.to_rfc3339())),
                        });
                        batches.push(SourceBatch {
                            source_id: source.id.clone(),
                            weight: source.weight * job.strategy.snapshot_weight_factor,
                            items: snapshot.items,
                        });
                    } else {
                        reports.push(SourceReport {
                            source_id: source.id.clone(),
                            origin: SourceOrigin::Failed,
                            items: 0,
                            detail: Some(format!("{error:#}")),
                        });
                    }
                }
            }
        }

        Ok(FetchOutcome { batches, reports })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::batch::RunLedger;
    use crate::clients::TraktConfig;
    use crate::lists::{CurationMode, FilterDef, ListDef, StrategyParams, ThresholdDef};
    use crate::store::identity::{IdentityCache, IdentityTtls};

    fn wrapped(imdb: &str, title: &str, year: Option<i32>) -> serde_json::Value {
        json!({
            "watchers": 80,
            "movie": {
                "title": title,
                "year": year,
                "ids": { "trakt": 7, "imdb": imdb, "tmdb": null },
                "rating": 7.2,
                "votes": 900,
                "genres": ["action"]
            }
        })
    }

    fn source(weight: f64, pages: u32) -> SourceDef {
        SourceDef {
            id: "trakt-trending".to_string(),
            provider: Provider::Trakt,
            path: "movies/trending".to_string(),
            weight,
            candidate_pages: pages,
        }
    }

    fn job_with(source: SourceDef, filters: FilterDef) -> ListJob {
        ListJob {
            run_id: Uuid::now_v7(),
            list: ListDef {
                id: "fetch-list".to_string(),
                name: "Fetch".to_string(),
                kind: MediaKind::Movie,
                sources: vec![source],
                filters,
                thresholds: ThresholdDef::default(),
                mode: CurationMode::Balanced,
                strategy: None,
                final_size: 10,
            },
            strategy: StrategyParams::preset(CurationMode::Balanced),
            period_key: "2025-W30".to_string(),
            now: Utc::now(),
            ledger: Arc::new(RunLedger::default()),
        }
    }

    fn stage_for(dir: &TempDir, server_uri: &str, retry: RetryConfig) -> ProviderFetchStage {
        let trakt = Arc::new(
            TraktClient::new(&TraktConfig {
                base_url: server_uri.to_string(),
                client_id: "cid".to_string(),
                access_token: None,
                connect_timeout: Duration::from_millis(500),
                total_timeout: Duration::from_secs(2),
                page_limit: 10,
            })
            .unwrap(),
        );
        let cache = Arc::new(IdentityCache::new(
            dir.path().join("identity.json"),
            IdentityTtls {
                found: Duration::from_secs(3600),
                not_found: Duration::from_secs(3600),
                error: Duration::from_secs(3600),
            },
        ));
        ProviderFetchStage::new(
            Some(trakt),
            None,
            Arc::new(IdentityResolver::new(cache, None)),
            Arc::new(SnapshotStore::new(
                dir.path().join("snapshots"),
                Duration::from_secs(72 * 3600),
            )),
            retry,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn pages_follow_the_pagination_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "2")
                    .set_body_json(json!([
                        wrapped("tt0000001", "First", Some(2010)),
                        wrapped("tt0000002", "Second", Some(2012)),
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "2")
                    .set_body_json(json!([wrapped("tt0000003", "Third", Some(2014))])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, &server.uri(), RetryConfig::default());
        // Page budget above what the provider has: the header stops us.
        let job = job_with(source(1.0, 5), FilterDef::default());

        let outcome = stage.fetch(&job).await.unwrap();

        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].items.len(), 3);
        assert_eq!(outcome.reports[0].origin, SourceOrigin::Live);
        assert_eq!(outcome.reports[0].items, 3);
        assert!(outcome.reports[0].detail.is_none());
    }

    #[tokio::test]
    async fn intake_filters_drop_items_before_fusion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "1")
                    .set_body_json(json!([
                        wrapped("tt0000001", "Old", Some(1985)),
                        wrapped("tt0000002", "Kept", Some(2010)),
                        wrapped("tt0000003", "Undated", None),
                    ])),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, &server.uri(), RetryConfig::default());
        let filters = FilterDef {
            year_min: Some(2000),
            year_max: None,
            genres_include: Vec::new(),
            genres_exclude: Vec::new(),
        };
        let job = job_with(source(1.0, 1), filters);

        let outcome = stage.fetch(&job).await.unwrap();

        assert_eq!(outcome.batches[0].items.len(), 1);
        assert_eq!(outcome.batches[0].items[0].id.as_str(), "tt0000002");
        assert_eq!(outcome.reports[0].items, 1);
        assert_eq!(outcome.reports[0].detail.as_deref(), Some("3 fetched"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "1")
                    .set_body_json(json!([wrapped("tt0000001", "Recovered", Some(2015))])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, &server.uri(), RetryConfig::new(3, 1, 10));
        let job = job_with(source(1.0, 1), FilterDef::default());

        let outcome = stage.fetch(&job).await.unwrap();

        assert_eq!(outcome.reports[0].origin, SourceOrigin::Live);
        assert_eq!(outcome.batches[0].items.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_replays_at_reduced_weight_when_live_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_with(source(2.0, 1), FilterDef::default());

        // First run against a healthy provider seeds the snapshot.
        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies/trending"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-pagination-page-count", "1")
                    .set_body_json(json!([wrapped("tt0000001", "Cached", Some(2018))])),
            )
            .mount(&healthy)
            .await;
        let stage = stage_for(&dir, &healthy.uri(), RetryConfig::new(1, 1, 10));
        stage.fetch(&job).await.unwrap();
        drop(healthy);

        // Second run against a broken provider replays it.
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;
        let stage = stage_for(&dir, &broken.uri(), RetryConfig::new(1, 1, 10));
        let outcome = stage.fetch(&job).await.unwrap();

        assert_eq!(outcome.reports[0].origin, SourceOrigin::Snapshot);
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].items[0].id.as_str(), "tt0000001");
        // Configured weight 2.0, snapshot factor 0.7.
        assert!((outcome.batches[0].weight - 1.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_source_without_snapshot_yields_no_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, &server.uri(), RetryConfig::new(1, 1, 10));
        let job = job_with(source(1.0, 1), FilterDef::default());

        let outcome = stage.fetch(&job).await.unwrap();

        assert!(outcome.batches.is_empty());
        assert_eq!(outcome.reports[0].origin, SourceOrigin::Failed);
        assert_eq!(outcome.reports[0].items, 0);
        assert!(outcome.reports[0].detail.is_some());
    }

    #[tokio::test]
    async fn auth_failures_abort_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let stage = stage_for(&dir, &server.uri(), RetryConfig::default());
        let job = job_with(source(1.0, 1), FilterDef::default());

        let error = stage.fetch(&job).await.unwrap_err();
        assert!(is_fatal(&error));
    }
}
