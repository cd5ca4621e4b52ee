//! Persist stage: assembles the final list document, writes it through
//! the idempotent output store, and records the selection in history and
//! exposure state. Dry runs assemble and compare but touch nothing.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::model::{ListOutput, ListStats, RankedItem, SourceReport};
use crate::pipeline::ListJob;
use crate::pipeline::rationale;
use crate::pipeline::score::ScoredPool;
use crate::pipeline::select::Selection;
use crate::store::history::StateStore;
use crate::store::output::{OutputStore, WriteOutcome};

#[derive(Debug)]
pub(crate) struct PersistOutcome {
    pub(crate) write: WriteOutcome,
    pub(crate) output: ListOutput,
}

#[async_trait]
pub(crate) trait PersistStage: Send + Sync {
    async fn persist(
        &self,
        job: &ListJob,
        pool: &ScoredPool,
        selection: &Selection,
        reports: Vec<SourceReport>,
        previous: Option<&ListOutput>,
    ) -> Result<PersistOutcome>;
}

pub(crate) struct OutputPersistStage {
    outputs: Arc<OutputStore>,
    state: Arc<StateStore>,
    dry_run: bool,
}

impl OutputPersistStage {
    pub(crate) fn new(outputs: Arc<OutputStore>, state: Arc<StateStore>, dry_run: bool) -> Self {
        Self {
            outputs,
            state,
            dry_run,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::cast_precision_loss)]
fn assemble(
    job: &ListJob,
    pool: &ScoredPool,
    selection: &Selection,
    reports: Vec<SourceReport>,
) -> ListOutput {
    let items: Vec<RankedItem> = selection
        .entries
        .iter()
        .map(|entry| {
            let item = &entry.scored.candidate.item;
            RankedItem {
                id: item.id.clone(),
                title: item.title.clone(),
                year: item.year,
                genres: item.genres.iter().cloned().collect(),
                rating: item.quality.rating,
                votes: (item.quality.votes > 0).then_some(item.quality.votes),
                score: round2(entry.final_score),
                sources: entry.scored.candidate.source_ids(),
                why: rationale::why_selected(entry),
                new_entry: !entry.in_previous,
            }
        })
        .collect();

    let selected = selection.entries.len();
    let distinct_genres = selection
        .entries
        .iter()
        .map(|entry| entry.scored.candidate.item.primary_genre().to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let ratio = |count: usize| {
        if selected == 0 {
            0.0
        } else {
            count as f64 / selected as f64
        }
    };

    ListOutput {
        list_id: job.list.id.clone(),
        name: job.list.name.clone(),
        kind: job.list.kind,
        generated_at: job.now,
        period_key: job.period_key.clone(),
        strategy: job.strategy.clone(),
        items,
        sources: reports,
        stats: ListStats {
            pool_size: pool.pool_size,
            scorable: pool.candidates.len(),
            new_entries: selection.metrics.new_entrants,
            new_entrant_ratio: ratio(selection.metrics.new_entrants),
            overlap_ratio: ratio(selection.metrics.overlap),
            core_size: selection.metrics.core_selected,
            overlap_cap: selection.metrics.overlap_cap,
            distinct_genres,
        },
    }
}

#[async_trait]
impl PersistStage for OutputPersistStage {
    async fn persist(
        &self,
        job: &ListJob,
        pool: &ScoredPool,
        selection: &Selection,
        reports: Vec<SourceReport>,
        previous: Option<&ListOutput>,
    ) -> Result<PersistOutcome> {
        let output = assemble(job, pool, selection, reports);

        let write = self.outputs.write_if_changed(&output, previous, self.dry_run)?;
        match write {
            WriteOutcome::Written => info!(
                list_id = %job.list.id,
                items = output.items.len(),
                new_entries = output.stats.new_entries,
                dry_run = self.dry_run,
                "list output written"
            ),
            WriteOutcome::Unchanged => info!(
                list_id = %job.list.id,
                "list output unchanged, write skipped"
            ),
        }

        // History and exposure advance on every successful run, including
        // an unchanged edition, so seen counts track published editions.
        if self.dry_run {
            debug!(list_id = %job.list.id, "dry run, state not recorded");
        } else {
            self.state.record_list(&job.list.id, &output.item_ids(), job.now);
        }

        Ok(PersistOutcome { write, output })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use smallvec::smallvec;
    use uuid::Uuid;

    use super::*;
    use crate::batch::RunLedger;
    use crate::lists::{CurationMode, FilterDef, ListDef, StrategyParams, ThresholdDef};
    use crate::model::{
        Candidate, CanonicalId, CatalogItem, MediaKind, QualitySignal, SourceHit, SourceOrigin,
    };
    use crate::pipeline::score::ScoredCandidate;
    use crate::pipeline::select::{SelectedEntry, SelectionMetrics, SelectionPhase};

    fn job() -> ListJob {
        ListJob {
            run_id: Uuid::now_v7(),
            list: ListDef {
                id: "weekly-action".to_string(),
                name: "Weekly Action".to_string(),
                kind: MediaKind::Movie,
                sources: Vec::new(),
                filters: FilterDef::default(),
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

    fn entry(id: &str, phase: SelectionPhase, score: f64) -> SelectedEntry {
        SelectedEntry {
            scored: ScoredCandidate {
                candidate: Candidate {
                    item: CatalogItem {
                        id: CanonicalId::parse(id).unwrap(),
                        title: format!("Title {id}"),
                        year: Some(2015),
                        genres: ["action".to_string()].into_iter().collect::<BTreeSet<_>>(),
                        quality: QualitySignal {
                            rating: Some(7.5),
                            votes: 1200,
                            popularity: 30.0,
                        },
                    },
                    hits: smallvec![SourceHit {
                        source_id: "trakt-trending".to_string(),
                        rank: 0,
                        total: 10,
                        weight: 1.0,
                    }],
                },
                base_score: score,
                source_boost: 0.0,
                novelty_boost: 0.0,
                exposure_penalty: 0.0,
                duplicate_penalty: 0.0,
                is_new: false,
            },
            phase,
            final_score: score,
            in_previous: phase == SelectionPhase::Core,
        }
    }

    fn selection(entries: Vec<SelectedEntry>) -> Selection {
        let overlap = entries.iter().filter(|entry| entry.in_previous).count();
        let new_entrants = entries.len() - overlap;
        let core_selected = entries
            .iter()
            .filter(|entry| entry.phase == SelectionPhase::Core)
            .count();
        Selection {
            entries,
            metrics: SelectionMetrics {
                core_target: 3,
                core_selected,
                overlap_cap: 6,
                overlap,
                new_entrants,
            },
        }
    }

    fn report() -> SourceReport {
        SourceReport {
            source_id: "trakt-trending".to_string(),
            origin: SourceOrigin::Live,
            items: 2,
            detail: None,
        }
    }

    #[tokio::test]
    async fn first_run_writes_output_and_records_state() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Arc::new(OutputStore::new(dir.path().join("output")));
        let state = Arc::new(StateStore::new(dir.path().join("state")));
        let stage = OutputPersistStage::new(Arc::clone(&outputs), Arc::clone(&state), false);

        let job = job();
        let pool = ScoredPool {
            candidates: Vec::new(),
            pool_size: 40,
        };
        let picked = selection(vec![
            entry("tt0000001", SelectionPhase::Core, 31.256),
            entry("tt0000002", SelectionPhase::Fill, 18.0),
        ]);

        let outcome = stage
            .persist(&job, &pool, &picked, vec![report()], None)
            .await
            .unwrap();

        assert_eq!(outcome.write, WriteOutcome::Written);
        let written = outputs.load("weekly-action").unwrap();
        assert_eq!(written.items.len(), 2);
        assert_eq!(written.items[0].why, "stable core pick");
        assert!((written.items[0].score - 31.26).abs() < 1e-9);
        assert!(!written.items[0].new_entry);
        assert!(written.items[1].new_entry);
        assert_eq!(written.stats.pool_size, 40);
        assert_eq!(written.stats.new_entries, 1);

        let history = state.history_view("weekly-action");
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[&CanonicalId::parse("tt0000001").unwrap()].seen_count,
            1
        );
        let exposure = state.exposure_view();
        assert_eq!(exposure[&CanonicalId::parse("tt0000002").unwrap()], 1);
    }

    #[tokio::test]
    async fn unchanged_selection_skips_the_write_but_bumps_history() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Arc::new(OutputStore::new(dir.path().join("output")));
        let state = Arc::new(StateStore::new(dir.path().join("state")));
        let stage = OutputPersistStage::new(Arc::clone(&outputs), Arc::clone(&state), false);

        let job = job();
        let pool = ScoredPool {
            candidates: Vec::new(),
            pool_size: 40,
        };
        let picked = selection(vec![entry("tt0000001", SelectionPhase::Core, 31.0)]);

        let first = stage
            .persist(&job, &pool, &picked, vec![report()], None)
            .await
            .unwrap();
        let second = stage
            .persist(&job, &pool, &picked, vec![report()], Some(&first.output))
            .await
            .unwrap();

        assert_eq!(second.write, WriteOutcome::Unchanged);
        let history = state.history_view("weekly-action");
        assert_eq!(
            history[&CanonicalId::parse("tt0000001").unwrap()].seen_count,
            2
        );
    }

    #[tokio::test]
    async fn dry_run_leaves_disk_and_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Arc::new(OutputStore::new(dir.path().join("output")));
        let state = Arc::new(StateStore::new(dir.path().join("state")));
        let stage = OutputPersistStage::new(Arc::clone(&outputs), Arc::clone(&state), true);

        let job = job();
        let pool = ScoredPool {
            candidates: Vec::new(),
            pool_size: 10,
        };
        let picked = selection(vec![entry("tt0000001", SelectionPhase::Fill, 12.0)]);

        let outcome = stage
            .persist(&job, &pool, &picked, vec![report()], None)
            .await
            .unwrap();

        assert_eq!(outcome.write, WriteOutcome::Written);
        assert!(outputs.load("weekly-action").is_none());
        assert!(state.history_view("weekly-action").is_empty());
    }

    #[tokio::test]
    async fn stats_summarize_the_selection() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = Arc::new(OutputStore::new(dir.path().join("output")));
        let state = Arc::new(StateStore::new(dir.path().join("state")));
        let stage = OutputPersistStage::new(outputs, state, true);

        let job = job();
        let pool = ScoredPool {
            candidates: Vec::new(),
            pool_size: 25,
        };
        let picked = selection(vec![
            entry("tt0000001", SelectionPhase::Core, 30.0),
            entry("tt0000002", SelectionPhase::Core, 28.0),
            entry("tt0000003", SelectionPhase::NewEntrant, 22.0),
            entry("tt0000004", SelectionPhase::Fill, 20.0),
        ]);

        let outcome = stage
            .persist(&job, &pool, &picked, vec![report()], None)
            .await
            .unwrap();

        let stats = &outcome.output.stats;
        assert_eq!(stats.core_size, 2);
        assert_eq!(stats.new_entries, 2);
        assert!((stats.new_entrant_ratio - 0.5).abs() < 1e-9);
        assert!((stats.overlap_ratio - 0.5).abs() < 1e-9);
        assert_eq!(stats.distinct_genres, 1);
    }
}
