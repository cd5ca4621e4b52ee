//! Per-list pipeline: fetch, fuse, score, select, persist.
//!
//! Stages are trait objects so tests can substitute any one of them. A
//! failed run falls back to the previous edition when one exists, with
//! history still advancing so stability bookkeeping stays consistent.
//! Only auth and config failures abort the whole batch.

pub mod fuse;
pub mod score;
pub mod select;

pub(crate) mod fetch;
pub(crate) mod novelty;
pub(crate) mod persist;
pub(crate) mod rationale;

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::RunLedger;
use crate::lists::{ListDef, StrategyParams};
use crate::model::{CanonicalId, ListOutput};
use crate::store::history::StateStore;
use crate::store::output::{OutputStore, WriteOutcome};
use crate::util::error::is_fatal;

use self::fetch::FetchStage;
use self::persist::PersistStage;
use self::score::ScoreStage;
use self::select::SelectStage;

/// Everything one list run needs, assembled by the batch runner.
pub(crate) struct ListJob {
    pub(crate) run_id: Uuid,
    pub(crate) list: ListDef,
    pub(crate) strategy: StrategyParams,
    pub(crate) period_key: String,
    pub(crate) now: DateTime<Utc>,
    /// Shared across the whole batch run for the cross-list duplicate
    /// penalty.
    pub(crate) ledger: Arc<RunLedger>,
}

/// How a list run ended. All three variants are successes for the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListRunOutcome {
    Written { items: usize, new_entries: usize },
    Unchanged { items: usize },
    KeptPrevious { items: usize, reason: String },
}

pub(crate) struct PipelineStages {
    pub(crate) fetch: Arc<dyn FetchStage>,
    pub(crate) score: Arc<dyn ScoreStage>,
    pub(crate) select: Arc<dyn SelectStage>,
    pub(crate) persist: Arc<dyn PersistStage>,
}

pub(crate) struct ListPipeline {
    stages: PipelineStages,
    outputs: Arc<OutputStore>,
    state: Arc<StateStore>,
    dry_run: bool,
}

impl ListPipeline {
    pub(crate) fn builder() -> ListPipelineBuilder {
        ListPipelineBuilder::new()
    }

    /// Run one list end to end. A non-fatal failure anywhere in the
    /// stages keeps the previous edition on disk and still records it in
    /// history, so a flaky provider does not reshuffle the next run.
    pub(crate) async fn execute(&self, job: &ListJob) -> Result<ListRunOutcome> {
        info!(
            run_id = %job.run_id,
            list_id = %job.list.id,
            kind = job.list.kind.as_str(),
            mode = job.list.mode.as_str(),
            period_key = %job.period_key,
            "list run started"
        );
        let previous = self.outputs.load(&job.list.id);

        match self.run_stages(job, previous.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if is_fatal(&error) {
                    return Err(error);
                }
                let Some(previous) = previous else {
                    return Err(error.context(format!(
                        "list '{}' failed with no previous edition to fall back to",
                        job.list.id
                    )));
                };
                warn!(
                    list_id = %job.list.id,
                    error = format!("{error:#}"),
                    "list run failed, keeping previous edition"
                );
                let ids = previous.item_ids();
                // The kept edition still occupies its slots: sibling
                // lists see the duplicates and seen counts advance.
                job.ledger.note_selected(&ids);
                if !self.dry_run {
                    self.state.record_list(&job.list.id, &ids, job.now);
                }
                Ok(ListRunOutcome::KeptPrevious {
                    items: ids.len(),
                    reason: format!("{error:#}"),
                })
            }
        }
    }

    async fn run_stages(
        &self,
        job: &ListJob,
        previous: Option<&ListOutput>,
    ) -> Result<ListRunOutcome> {
        let fetched = self.stages.fetch.fetch(job).await?;
        if fetched.batches.is_empty() {
            bail!("all sources failed and no snapshot was usable");
        }

        let pool = fuse::fuse_batches(fetched.batches);
        debug!(
            list_id = %job.list.id,
            candidates = pool.candidates.len(),
            "sources fused"
        );
        if pool.candidates.is_empty() {
            bail!("candidate pool is empty after fusion");
        }

        let scored = self.stages.score.score(job, pool).await?;
        if scored.candidates.is_empty() {
            bail!("no scorable candidates in the pool");
        }

        let previous_ids: Vec<CanonicalId> =
            previous.map(ListOutput::item_ids).unwrap_or_default();
        let selection = self
            .stages
            .select
            .select(job, &scored.candidates, &previous_ids)
            .await?;
        debug!(
            list_id = %job.list.id,
            selected = selection.entries.len(),
            core = selection.metrics.core_selected,
            new_entrants = selection.metrics.new_entrants,
            "selection complete"
        );

        let selected_ids: Vec<CanonicalId> = selection
            .entries
            .iter()
            .map(|entry| entry.scored.id().clone())
            .collect();
        job.ledger.note_selected(&selected_ids);

        let persisted = self
            .stages
            .persist
            .persist(job, &scored, &selection, fetched.reports, previous)
            .await?;

        Ok(match persisted.write {
            WriteOutcome::Written => ListRunOutcome::Written {
                items: persisted.output.items.len(),
                new_entries: persisted.output.stats.new_entries,
            },
            WriteOutcome::Unchanged => ListRunOutcome::Unchanged {
                items: persisted.output.items.len(),
            },
        })
    }
}

#[derive(Default)]
pub(crate) struct ListPipelineBuilder {
    fetch: Option<Arc<dyn FetchStage>>,
    score: Option<Arc<dyn ScoreStage>>,
    select: Option<Arc<dyn SelectStage>>,
    persist: Option<Arc<dyn PersistStage>>,
    outputs: Option<Arc<OutputStore>>,
    state: Option<Arc<StateStore>>,
    dry_run: bool,
}

impl ListPipelineBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_fetch_stage(mut self, stage: Arc<dyn FetchStage>) -> Self {
        self.fetch = Some(stage);
        self
    }

    pub(crate) fn with_score_stage(mut self, stage: Arc<dyn ScoreStage>) -> Self {
        self.score = Some(stage);
        self
    }

    pub(crate) fn with_select_stage(mut self, stage: Arc<dyn SelectStage>) -> Self {
        self.select = Some(stage);
        self
    }

    pub(crate) fn with_persist_stage(mut self, stage: Arc<dyn PersistStage>) -> Self {
        self.persist = Some(stage);
        self
    }

    pub(crate) fn with_outputs(mut self, outputs: Arc<OutputStore>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub(crate) fn with_state(mut self, state: Arc<StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub(crate) fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// # Panics
    /// Panics when a stage or store is missing. The registry wires every
    /// field, so a panic here is a wiring bug, not a runtime state.
    pub(crate) fn build(self) -> ListPipeline {
        ListPipeline {
            stages: PipelineStages {
                fetch: self
                    .fetch
                    .unwrap_or_else(|| panic!("fetch stage must be configured before build")),
                score: self
                    .score
                    .unwrap_or_else(|| panic!("score stage must be configured before build")),
                select: self
                    .select
                    .unwrap_or_else(|| panic!("select stage must be configured before build")),
                persist: self
                    .persist
                    .unwrap_or_else(|| panic!("persist stage must be configured before build")),
            },
            outputs: self
                .outputs
                .unwrap_or_else(|| panic!("output store must be configured before build")),
            state: self
                .state
                .unwrap_or_else(|| panic!("state store must be configured before build")),
            dry_run: self.dry_run,
        }
    }
}
